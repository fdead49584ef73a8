//! Shared fakes for the integration tests.
//!
//! Every external system the orchestrator talks to has an in-memory
//! stand-in here that records what it was asked to do.

#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream};
use postlink::pipeline::deliver::{Deliver, DeliveryOrder};
use postlink::pipeline::mailbox::{InboxMessage, Mailbox, MailboxConnector};
use postlink::pipeline::render::{BrowserLauncher, BrowserSession, PrintOptions};
use postlink::pipeline::rewrite::BuiltinSed;
use postlink::pipeline::shell::UploadHook;
use postlink::{Collaborators, Config, MergedDocument, PostlinkError, TaskError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// ── PDFs ─────────────────────────────────────────────────────────────────────

/// A PDF whose page `i` shows the text `"{label} {i}"`.
pub fn sample_pdf(pages: usize, label: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let mut kids: Vec<Object> = Vec::new();
    for i in 1..=pages {
        let content = format!("BT /F1 18 Tf 72 720 Td ({label} {i}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// Page texts in order, as written by [`sample_pdf`]. Pages from other
/// producers come back as empty strings.
pub fn page_labels(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .into_values()
        .map(|id| {
            let content = doc.get_page_content(id).unwrap_or_default();
            let text = String::from_utf8_lossy(&content);
            match (text.find('('), text.rfind(')')) {
                (Some(start), Some(end)) if start < end => text[start + 1..end].to_string(),
                _ => String::new(),
            }
        })
        .collect()
}

// ── Config ───────────────────────────────────────────────────────────────────

pub fn config(workdir: &Path, covers: &[PathBuf], max_pages: usize) -> Config {
    let covers: Vec<String> = covers
        .iter()
        .map(|c| serde_json::to_string(&c.display().to_string()).unwrap())
        .collect();
    let yaml = format!(
        r#"
imap: {{ host: imap.test, port: 993, user: news@test, password: pw }}
generate:
  sed_options: "s/<img[^>]*>//g"
  css_styling: "body {{ font-size: 11pt }}"
  pdf_max_pages: {max_pages}
  settle_ms: 0
cover_letters: [{covers}]
pingen: {{ client_id: id, client_secret: secret, organisation_id: org }}
workdir: {workdir}
"#,
        covers = covers.join(", "),
        workdir = serde_json::to_string(&workdir.display().to_string()).unwrap(),
    );
    Config::from_yaml_str(&yaml).unwrap()
}

// ── Mailbox ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MailState {
    pub messages: BTreeMap<u32, InboxMessage>,
    pub stored: Vec<u32>,
    pub connects: usize,
    pub logouts: usize,
}

#[derive(Clone, Default)]
pub struct FakeMail {
    pub state: Arc<Mutex<MailState>>,
}

impl FakeMail {
    pub fn with_message(self, uid: u32, seen: bool, html: &str) -> Self {
        let raw = format!(
            "From: Newsletter <news@mailchi.mp>\r\n\
             Subject: Infomail {uid}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/html; charset=utf-8\r\n\
             \r\n\
             {html}\r\n"
        );
        self.state.lock().unwrap().messages.insert(
            uid,
            InboxMessage {
                uid,
                flags: if seen { vec!["\\Seen".into()] } else { vec![] },
                raw: raw.into_bytes(),
            },
        );
        self
    }

    pub fn flags(&self, uid: u32) -> Vec<String> {
        self.state.lock().unwrap().messages[&uid].flags.clone()
    }
}

struct FakeMailSession {
    state: Arc<Mutex<MailState>>,
}

#[async_trait]
impl MailboxConnector for FakeMail {
    async fn connect(&self) -> Result<Box<dyn Mailbox>, PostlinkError> {
        self.state.lock().unwrap().connects += 1;
        Ok(Box::new(FakeMailSession {
            state: Arc::clone(&self.state),
        }))
    }
}

#[async_trait]
impl Mailbox for FakeMailSession {
    async fn list_all(&mut self) -> Result<Vec<u32>, PostlinkError> {
        Ok(self.state.lock().unwrap().messages.keys().copied().collect())
    }

    async fn fetch_flags(&mut self, uid: u32) -> Result<Vec<String>, PostlinkError> {
        Ok(self.state.lock().unwrap().messages[&uid].flags.clone())
    }

    async fn fetch_message(&mut self, uid: u32) -> Result<InboxMessage, PostlinkError> {
        Ok(self.state.lock().unwrap().messages[&uid].clone())
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), PostlinkError> {
        let mut state = self.state.lock().unwrap();
        state.stored.push(uid);
        if let Some(m) = state.messages.get_mut(&uid) {
            m.flags.push("\\Seen".into());
        }
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), PostlinkError> {
        self.state.lock().unwrap().logouts += 1;
        Ok(())
    }
}

// ── Browser ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct BrowserCalls {
    pub launches: usize,
    pub closes: usize,
    pub navigated: Vec<String>,
    pub printed: Vec<PrintOptions>,
}

/// Serves `html` for remote URLs, the file itself for `file://` URLs, and
/// `pdf` for every print.
#[derive(Clone)]
pub struct FakeBrowser {
    pub html: String,
    pub pdf: Vec<u8>,
    pub fail_print: bool,
    pub calls: Arc<Mutex<BrowserCalls>>,
}

impl FakeBrowser {
    pub fn new(html: &str, pdf: Vec<u8>) -> Self {
        Self {
            html: html.into(),
            pdf,
            fail_print: false,
            calls: Arc::default(),
        }
    }

    pub fn launches(&self) -> usize {
        self.calls.lock().unwrap().launches
    }
}

struct FakeTab {
    browser: FakeBrowser,
    current: String,
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, PostlinkError> {
        self.calls.lock().unwrap().launches += 1;
        Ok(Box::new(FakeTab {
            browser: self.clone(),
            current: String::new(),
        }))
    }
}

#[async_trait]
impl BrowserSession for FakeTab {
    async fn navigate(&mut self, url: &str) -> Result<(), PostlinkError> {
        self.browser.calls.lock().unwrap().navigated.push(url.into());
        self.current = match url.strip_prefix("file://") {
            Some(_) => {
                let path = url::Url::parse(url).unwrap().to_file_path().unwrap();
                std::fs::read_to_string(path).unwrap()
            }
            None => self.browser.html.clone(),
        };
        Ok(())
    }

    async fn content(&mut self) -> Result<String, PostlinkError> {
        Ok(self.current.clone())
    }

    async fn add_style(&mut self, _css: &str) -> Result<(), PostlinkError> {
        Ok(())
    }

    async fn print_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, PostlinkError> {
        self.browser.calls.lock().unwrap().printed.push(*options);
        if self.browser.fail_print {
            return Err(PostlinkError::Browser("print to pdf failed: crashed".into()));
        }
        Ok(self.browser.pdf.clone())
    }

    async fn close(&mut self) -> Result<(), PostlinkError> {
        self.browser.calls.lock().unwrap().closes += 1;
        Ok(())
    }
}

// ── Upload hook ──────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct FakeUpload {
    pub runs: Arc<Mutex<usize>>,
    pub fail: bool,
}

#[async_trait]
impl UploadHook for FakeUpload {
    async fn run(&self) -> Result<(), PostlinkError> {
        *self.runs.lock().unwrap() += 1;
        if self.fail {
            return Err(PostlinkError::UploadCommand {
                cmd: "rsync".into(),
                detail: "exited with exit status: 23".into(),
            });
        }
        Ok(())
    }
}

// ── Delivery ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Submitted {
    pub file_name: String,
    pub page_count: usize,
    pub labels: Vec<String>,
}

/// Accepts every document except the submission numbers in `fail_calls`
/// (0-based), handing out ids `letter-1`, `letter-2`, ….
#[derive(Clone, Default)]
pub struct FakeDelivery {
    pub fail_calls: Vec<usize>,
    pub submitted: Arc<Mutex<Vec<Submitted>>>,
}

impl FakeDelivery {
    pub fn count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl Deliver for FakeDelivery {
    async fn submit(&self, document: &MergedDocument) -> Result<DeliveryOrder, TaskError> {
        let call = {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(Submitted {
                file_name: document.file_name(),
                page_count: document.page_count,
                labels: page_labels(&document.bytes),
            });
            submitted.len() - 1
        };
        if self.fail_calls.contains(&call) {
            return Err(TaskError::Upload {
                detail: "HTTP 500 Internal Server Error".into(),
            });
        }
        Ok(DeliveryOrder {
            id: format!("letter-{}", call + 1),
            file_name: document.file_name(),
        })
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────────

pub struct Harness {
    pub mail: FakeMail,
    pub browser: FakeBrowser,
    pub upload: FakeUpload,
    pub delivery: FakeDelivery,
}

impl Harness {
    pub fn new(mail: FakeMail, browser: FakeBrowser) -> Self {
        Self {
            mail,
            browser,
            upload: FakeUpload::default(),
            delivery: FakeDelivery::default(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            mailbox: Box::new(self.mail.clone()),
            browser: Box::new(self.browser.clone()),
            rewriter: Box::new(BuiltinSed::default()),
            upload: Some(Box::new(self.upload.clone())),
            delivery: Box::new(self.delivery.clone()),
        }
    }

    pub fn upload_runs(&self) -> usize {
        *self.upload.runs.lock().unwrap()
    }
}

pub const NEWSLETTER_HTML: &str = r#"<html><body>
<a href="https://example.com/unsubscribe">unsubscribe</a>
<a href="https://us21.mailchi.mp/verein/infomail-maerz">View this email in your browser</a>
</body></html>"#;

pub const PAGE_HTML: &str = "<html><body>\n<img src=\"https://tracking.test/p.gif\">\n<h1>Infomail</h1>\n</body></html>\n";
