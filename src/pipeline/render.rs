//! Document renderer: remote newsletter page → cleaned, styled A4 PDF.
//!
//! Two browser passes around the HTML rewrite:
//!
//! 1. load the remote page, wait for the network to go idle, capture the live DOM
//! 2. rewrite it, then load the cleaned copy from disk in the same tab,
//!    inject the print stylesheet and print
//!
//! The browser sits behind [`BrowserSession`] so the stage logic can be
//! tested without Chromium.

use crate::config::{BrowserConfig, GenerateConfig};
use crate::document::{Artifacts, RenderedDocument};
use crate::error::PostlinkError;
use crate::pipeline::pdf;
use crate::pipeline::rewrite::TextTransform;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const A4_WIDTH_IN: f64 = 8.27;
const A4_HEIGHT_IN: f64 = 11.69;
const MM_PER_INCH: f64 = 25.4;

/// Paper and margin settings for the print pass, in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintOptions {
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin: f64,
    pub print_background: bool,
}

impl PrintOptions {
    /// A4 with `margin_mm` on every side, backgrounds off.
    pub fn a4(margin_mm: f64) -> Self {
        Self {
            paper_width: A4_WIDTH_IN,
            paper_height: A4_HEIGHT_IN,
            margin: margin_mm / MM_PER_INCH,
            print_background: false,
        }
    }
}

/// One tab in a headless browser.
#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url` and wait until its network traffic has gone idle.
    async fn navigate(&mut self, url: &str) -> Result<(), PostlinkError>;

    /// Serialised DOM of the current page.
    async fn content(&mut self) -> Result<String, PostlinkError>;

    /// Append a `<style>` element holding `css`.
    async fn add_style(&mut self, css: &str) -> Result<(), PostlinkError>;

    async fn print_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, PostlinkError>;

    /// Shut the browser down. Called exactly once, after rendering.
    async fn close(&mut self) -> Result<(), PostlinkError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, PostlinkError>;
}

async fn write_artifact(path: &Path, contents: &[u8]) -> Result<(), PostlinkError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| PostlinkError::ArtifactWrite {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Render `url` into `<workdir>/infomail.pdf`.
///
/// Leaves the session open; the caller closes it.
pub async fn render_document(
    session: &mut dyn BrowserSession,
    url: &Url,
    rewriter: &dyn TextTransform,
    config: &GenerateConfig,
    artifacts: &Artifacts,
) -> Result<RenderedDocument, PostlinkError> {
    // ── Step 1: capture the live page ────────────────────────────────────
    session.navigate(url.as_str()).await?;
    if config.settle_ms > 0 {
        tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;
    }
    let original = session.content().await?;
    let original_path = artifacts.original_html();
    write_artifact(&original_path, original.as_bytes()).await?;
    debug!("captured {} bytes of HTML from {url}", original.len());

    // ── Step 2: rewrite ──────────────────────────────────────────────────
    let cleaned = rewriter.apply(&original, &config.sed_options).await?;
    let cleaned_path = artifacts.cleaned_html();
    write_artifact(&cleaned_path, cleaned.as_bytes()).await?;
    info!(
        "html cleaned: {} → {} bytes",
        original.len(),
        cleaned.len()
    );

    // ── Step 3: reload the cleaned copy locally ──────────────────────────
    let absolute = tokio::fs::canonicalize(&cleaned_path)
        .await
        .map_err(|e| PostlinkError::ArtifactWrite {
            path: cleaned_path.clone(),
            source: e,
        })?;
    let file_url = Url::from_file_path(&absolute)
        .map_err(|_| PostlinkError::Internal(format!("not a file path: {}", absolute.display())))?;
    session.navigate(file_url.as_str()).await?;

    // ── Step 4: style and print ──────────────────────────────────────────
    if !config.css_styling.trim().is_empty() {
        session.add_style(&config.css_styling).await?;
    }
    let bytes = session.print_pdf(&PrintOptions::a4(config.margin_mm)).await?;

    let path = artifacts.general_pdf();
    write_artifact(&path, &bytes).await?;

    let (bytes, page_count) = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || {
            let count = pdf::page_count(&bytes, &path)?;
            Ok::<_, PostlinkError>((bytes, count))
        })
        .await
        .map_err(|e| PostlinkError::Internal(format!("Page count task panicked: {e}")))??
    };
    info!("pdf created: '{}' ({} pages)", path.display(), page_count);

    Ok(RenderedDocument {
        path,
        bytes,
        page_count,
    })
}

// ── Network idle ─────────────────────────────────────────────────────────

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Requests in flight on a page and when that set last changed.
#[derive(Debug)]
pub struct NetworkActivity {
    in_flight: HashSet<String>,
    last_change: Instant,
}

impl Default for NetworkActivity {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl NetworkActivity {
    pub fn new(now: Instant) -> Self {
        Self {
            in_flight: HashSet::new(),
            last_change: now,
        }
    }

    /// Forget everything in flight; a new navigation starts now.
    pub fn reset(&mut self, now: Instant) {
        self.in_flight.clear();
        self.last_change = now;
    }

    pub fn request_started(&mut self, id: &str, now: Instant) {
        self.in_flight.insert(id.to_string());
        self.last_change = now;
    }

    /// Finished or failed. Unknown ids (left over from an earlier page) are ignored.
    pub fn request_ended(&mut self, id: &str, now: Instant) {
        if self.in_flight.remove(id) {
            self.last_change = now;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// No request in flight for at least `quiet`.
    pub fn is_idle(&self, now: Instant, quiet: Duration) -> bool {
        self.in_flight.is_empty() && now.saturating_duration_since(self.last_change) >= quiet
    }
}

/// Poll `activity` until it has been idle for `quiet`.
///
/// Returns the number of requests still in flight when `limit` runs out.
pub async fn wait_for_network_idle(
    activity: &Mutex<NetworkActivity>,
    quiet: Duration,
    limit: Duration,
) -> Result<(), usize> {
    let deadline = Instant::now() + limit;
    loop {
        let now = Instant::now();
        let pending = {
            let activity = activity.lock().unwrap_or_else(|e| e.into_inner());
            if activity.is_idle(now, quiet) {
                return Ok(());
            }
            activity.in_flight()
        };
        if now >= deadline {
            return Err(pending);
        }
        tokio::time::sleep(IDLE_POLL).await;
    }
}

/// Feed the page's network events into `activity` until the page goes away.
async fn track_network(
    page: &Page,
    activity: Arc<Mutex<NetworkActivity>>,
) -> Result<JoinHandle<()>, PostlinkError> {
    let listen_err = |e: chromiumoxide::error::CdpError| {
        PostlinkError::Browser(format!("cannot subscribe to network events: {e}"))
    };
    let mut started = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(listen_err)?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(listen_err)?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(listen_err)?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(ev) = started.next() => {
                    let id: &str = ev.request_id.as_ref();
                    activity.lock().unwrap_or_else(|e| e.into_inner()).request_started(id, Instant::now());
                }
                Some(ev) = finished.next() => {
                    let id: &str = ev.request_id.as_ref();
                    activity.lock().unwrap_or_else(|e| e.into_inner()).request_ended(id, Instant::now());
                }
                Some(ev) = failed.next() => {
                    let id: &str = ev.request_id.as_ref();
                    activity.lock().unwrap_or_else(|e| e.into_inner()).request_ended(id, Instant::now());
                }
                else => break,
            }
        }
    }))
}

// ── chromiumoxide backend ────────────────────────────────────────────────

/// Launches headless Chromium through chromiumoxide.
pub struct ChromiumLauncher {
    config: BrowserConfig,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, PostlinkError> {
        let mut builder = ChromeConfig::builder();
        if let Some(exe) = &self.config.executable {
            builder = builder.chrome_executable(exe);
        }
        if self.config.no_sandbox {
            builder = builder.no_sandbox();
        }
        let chrome_config = builder.build().map_err(PostlinkError::Browser)?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .map_err(|e| PostlinkError::Browser(format!("launch failed: {e}")))?;

        // The CDP connection only makes progress while the handler is polled.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| PostlinkError::Browser(format!("cannot open tab: {e}")))?;
        let network = Arc::new(Mutex::new(NetworkActivity::default()));
        let network_task = track_network(&page, network.clone()).await?;
        debug!("headless browser launched");

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            network,
            quiet: Duration::from_millis(self.config.network_idle_ms),
            timeout: Duration::from_secs(self.config.navigation_timeout_secs),
            handler_task: Some(handler_task),
            network_task: Some(network_task),
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    network: Arc<Mutex<NetworkActivity>>,
    quiet: Duration,
    timeout: Duration,
    handler_task: Option<JoinHandle<()>>,
    network_task: Option<JoinHandle<()>>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), PostlinkError> {
        let nav_err = |e: chromiumoxide::error::CdpError| PostlinkError::Navigation {
            url: url.to_string(),
            detail: e.to_string(),
        };
        self.network
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset(Instant::now());
        self.page.goto(url).await.map_err(nav_err)?;
        self.page.wait_for_navigation().await.map_err(nav_err)?;

        let started = Instant::now();
        wait_for_network_idle(&self.network, self.quiet, self.timeout)
            .await
            .map_err(|pending| PostlinkError::Navigation {
                url: url.to_string(),
                detail: format!(
                    "network not idle after {}s ({pending} requests in flight)",
                    self.timeout.as_secs()
                ),
            })?;
        debug!("network idle {:?} after load of {url}", started.elapsed());
        Ok(())
    }

    async fn content(&mut self) -> Result<String, PostlinkError> {
        self.page
            .content()
            .await
            .map_err(|e| PostlinkError::Browser(format!("cannot read page content: {e}")))
    }

    async fn add_style(&mut self, css: &str) -> Result<(), PostlinkError> {
        let literal = serde_json::to_string(css)
            .map_err(|e| PostlinkError::Internal(format!("cannot encode css: {e}")))?;
        let script = format!(
            "(() => {{ const s = document.createElement('style'); s.textContent = {literal}; \
             (document.head || document.documentElement).appendChild(s); }})()"
        );
        self.page
            .evaluate(script)
            .await
            .map_err(|e| PostlinkError::Browser(format!("cannot inject css: {e}")))?;
        Ok(())
    }

    async fn print_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, PostlinkError> {
        let params = PrintToPdfParams {
            paper_width: Some(options.paper_width),
            paper_height: Some(options.paper_height),
            margin_top: Some(options.margin),
            margin_bottom: Some(options.margin),
            margin_left: Some(options.margin),
            margin_right: Some(options.margin),
            print_background: Some(options.print_background),
            ..Default::default()
        };
        self.page
            .pdf(params)
            .await
            .map_err(|e| PostlinkError::Browser(format!("print to pdf failed: {e}")))
    }

    async fn close(&mut self) -> Result<(), PostlinkError> {
        let result = self
            .browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| PostlinkError::Browser(format!("close failed: {e}")));
        if let Err(e) = self.browser.wait().await {
            warn!("browser process did not exit cleanly: {e}");
        }
        if let Some(task) = self.network_task.take() {
            task.abort();
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        debug!("headless browser closed");
        result
    }
}
