//! Minimal IMAP4rev1 client over rustls.
//!
//! Only what the inbox scanner needs: LOGIN, SELECT, `UID SEARCH ALL`,
//! `UID FETCH` (flags, or flags plus `BODY.PEEK[]`), `UID STORE +FLAGS.SILENT`
//! and LOGOUT. Commands are tagged `A1`, `A2`, …; responses are read line by
//! line until the tagged status, with `{n}` literals read as raw bytes.
//!
//! The protocol code is synchronous and generic over the stream so it can
//! be driven by a scripted buffer in tests. [`ImapMailbox`] moves the
//! session onto the blocking pool for every call.

use crate::config::ImapConfig;
use crate::error::PostlinkError;
use crate::pipeline::mailbox::{InboxMessage, Mailbox, MailboxConnector};
use async_trait::async_trait;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Any byte stream an IMAP session can run over.
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

/// One untagged (`* …`) response, literals split out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Untagged {
    /// Response text without the leading `* ` and with literals removed.
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

fn protocol(detail: impl Into<String>) -> PostlinkError {
    PostlinkError::MailboxProtocol(detail.into())
}

fn io_err(e: std::io::Error) -> PostlinkError {
    protocol(format!("I/O error: {e}"))
}

pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap a connected stream and consume the server greeting.
    pub fn new(stream: S) -> Result<Self, PostlinkError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        let greeting = String::from_utf8_lossy(&greeting);
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(protocol(format!("unexpected greeting: {}", greeting.trim_end())));
        }
        debug!("IMAP < {}", greeting.trim_end());
        Ok(session)
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<(), PostlinkError> {
        let cmd = format!("LOGIN {} {}", quote(user)?, quote(password)?);
        self.command(&cmd).map(|_| ()).map_err(|e| match e {
            PostlinkError::MailboxProtocol(detail) => PostlinkError::MailboxLogin {
                user: user.to_string(),
                detail,
            },
            other => other,
        })
    }

    pub fn select(&mut self, mailbox: &str) -> Result<(), PostlinkError> {
        self.command(&format!("SELECT {}", quote(mailbox)?)).map(|_| ())
    }

    /// All UIDs in the selected mailbox, ascending.
    pub fn uid_search_all(&mut self) -> Result<Vec<u32>, PostlinkError> {
        let responses = self.command("UID SEARCH ALL")?;
        let mut uids: Vec<u32> = responses
            .iter()
            .filter_map(|r| r.text.strip_prefix("SEARCH"))
            .flat_map(|rest| rest.split_whitespace())
            .filter_map(|tok| tok.parse().ok())
            .collect();
        uids.sort_unstable();
        uids.dedup();
        Ok(uids)
    }

    pub fn uid_fetch_flags(&mut self, uid: u32) -> Result<Vec<String>, PostlinkError> {
        let responses = self.command(&format!("UID FETCH {uid} (FLAGS)"))?;
        let fetch = find_fetch(&responses, uid)
            .ok_or_else(|| protocol(format!("no FETCH response for UID {uid}")))?;
        Ok(parse_flags(&fetch.text))
    }

    /// Flags and full source; `BODY.PEEK` leaves `\Seen` alone.
    pub fn uid_fetch_message(&mut self, uid: u32) -> Result<InboxMessage, PostlinkError> {
        let responses = self.command(&format!("UID FETCH {uid} (FLAGS BODY.PEEK[])"))?;
        let fetch = find_fetch(&responses, uid)
            .ok_or_else(|| protocol(format!("no FETCH response for UID {uid}")))?;
        let raw = fetch
            .literals
            .first()
            .cloned()
            .ok_or_else(|| protocol(format!("FETCH for UID {uid} carried no body")))?;
        Ok(InboxMessage {
            uid,
            flags: parse_flags(&fetch.text),
            raw,
        })
    }

    pub fn uid_store_seen(&mut self, uid: u32) -> Result<(), PostlinkError> {
        self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Seen)"))
            .map(|_| ())
    }

    pub fn logout(&mut self) -> Result<(), PostlinkError> {
        self.command("LOGOUT").map(|_| ())
    }

    /// Send one tagged command and collect untagged responses until its
    /// status line. `NO`/`BAD` become [`PostlinkError::MailboxProtocol`].
    pub fn command(&mut self, cmd: &str) -> Result<Vec<Untagged>, PostlinkError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        let verb = cmd.split_whitespace().next().unwrap_or_default();
        // Never log arguments: LOGIN carries the password.
        debug!("IMAP > {tag} {verb}");

        let writer = self.stream.get_mut();
        writer
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .map_err(io_err)?;
        writer.flush().map_err(io_err)?;

        let mut untagged = Vec::new();
        loop {
            let line = self.read_line()?;
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);

            if let Some(status) = text.strip_prefix(&format!("{tag} ")) {
                return if status.starts_with("OK") {
                    Ok(untagged)
                } else {
                    Err(protocol(format!("{verb} failed: {status}")))
                };
            }
            if let Some(rest) = text.strip_prefix("* ") {
                untagged.push(self.read_untagged(rest.to_string())?);
            } else if text.starts_with('+') {
                return Err(protocol(format!("unexpected continuation after {verb}")));
            }
            // Anything else (stray tagged lines) is ignored.
        }
    }

    /// Complete an untagged response, pulling in any `{n}` literals.
    fn read_untagged(&mut self, first: String) -> Result<Untagged, PostlinkError> {
        let mut response = Untagged::default();
        let mut segment = first;
        loop {
            match literal_len(&segment) {
                Some((prefix_len, n)) => {
                    response.text.push_str(&segment[..prefix_len]);
                    let mut literal = vec![0u8; n];
                    self.stream.read_exact(&mut literal).map_err(io_err)?;
                    response.literals.push(literal);
                    let next = self.read_line()?;
                    segment = String::from_utf8_lossy(&next)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                }
                None => {
                    response.text.push_str(&segment);
                    return Ok(response);
                }
            }
        }
    }

    fn read_line(&mut self) -> Result<Vec<u8>, PostlinkError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf).map_err(io_err)?;
        if n == 0 {
            return Err(protocol("connection closed by server"));
        }
        Ok(buf)
    }

    #[cfg(test)]
    fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

/// Quote an IMAP string argument.
fn quote(value: &str) -> Result<String, PostlinkError> {
    if value.contains(['\r', '\n']) {
        return Err(protocol("line breaks are not allowed in IMAP arguments"));
    }
    Ok(format!(
        "\"{}\"",
        value.replace('\\', "\\\\").replace('"', "\\\"")
    ))
}

/// `…{123}` at the end of a line: (offset of `{`, 123).
fn literal_len(line: &str) -> Option<(usize, usize)> {
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    let n = inner[open + 1..].trim_end_matches('+').parse().ok()?;
    Some((open, n))
}

/// The `n FETCH (…)` response for `uid`, skipping unsolicited ones.
fn find_fetch(responses: &[Untagged], uid: u32) -> Option<&Untagged> {
    responses.iter().find(|r| {
        let mut tokens = r.text.split_whitespace();
        tokens.next().is_some_and(|seq| seq.parse::<u32>().is_ok())
            && tokens.next().is_some_and(|kw| kw.eq_ignore_ascii_case("FETCH"))
            && fetch_uid(&r.text) == Some(uid)
    })
}

fn fetch_uid(text: &str) -> Option<u32> {
    let upper = text.to_ascii_uppercase();
    let at = upper.find("UID ")?;
    text[at + 4..]
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()
}

/// Contents of the `FLAGS (…)` list in a FETCH response.
fn parse_flags(text: &str) -> Vec<String> {
    let upper = text.to_ascii_uppercase();
    let Some(at) = upper.find("FLAGS (") else {
        return Vec::new();
    };
    let rest = &text[at + "FLAGS (".len()..];
    let end = rest.find(')').unwrap_or(rest.len());
    rest[..end].split_whitespace().map(str::to_string).collect()
}

// ── Network plumbing ────────────────────────────────────────────────────

fn connect_transport(config: &ImapConfig) -> Result<Box<dyn Transport>, PostlinkError> {
    let connect_err = |detail: String| PostlinkError::MailboxConnect {
        host: config.host.clone(),
        port: config.port,
        detail,
    };
    let timeout = Duration::from_secs(config.timeout_secs.max(1));

    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| connect_err(format!("cannot resolve: {e}")))?
        .next()
        .ok_or_else(|| connect_err("host resolved to no addresses".into()))?;
    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| connect_err(e.to_string()))?;
    tcp.set_read_timeout(Some(timeout))
        .and_then(|_| tcp.set_write_timeout(Some(timeout)))
        .map_err(|e| connect_err(e.to_string()))?;

    if !config.tls {
        return Ok(Box::new(tcp));
    }

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| connect_err(e.to_string()))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
        .map_err(|e| connect_err(e.to_string()))?;
    let conn = rustls::ClientConnection::new(Arc::new(tls_config), server_name)
        .map_err(|e| connect_err(e.to_string()))?;
    Ok(Box::new(rustls::StreamOwned::new(conn, tcp)))
}

/// Connects to the configured server, logs in and selects the mailbox.
pub struct ImapConnector {
    config: ImapConfig,
}

impl ImapConnector {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn Mailbox>, PostlinkError> {
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || {
            let transport = connect_transport(&config)?;
            let mut session = ImapSession::new(transport)?;
            session.login(&config.user, &config.password)?;
            session.select(&config.mailbox)?;
            info!(
                "mailbox {} selected on {}:{}",
                config.mailbox, config.host, config.port
            );
            Ok::<_, PostlinkError>(session)
        })
        .await
        .map_err(|e| PostlinkError::Internal(format!("IMAP connect task panicked: {e}")))??;

        Ok(Box::new(ImapMailbox::new(session)))
    }
}

/// [`Mailbox`] backed by a live [`ImapSession`].
pub struct ImapMailbox {
    session: Option<ImapSession<Box<dyn Transport>>>,
}

impl ImapMailbox {
    pub fn new(session: ImapSession<Box<dyn Transport>>) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// Run `f` on the blocking pool, then put the session back.
    async fn with_session<T, F>(&mut self, f: F) -> Result<T, PostlinkError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession<Box<dyn Transport>>) -> Result<T, PostlinkError> + Send + 'static,
    {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| protocol("session already closed"))?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| PostlinkError::Internal(format!("IMAP task panicked: {e}")))?;
        self.session = Some(session);
        result
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn list_all(&mut self) -> Result<Vec<u32>, PostlinkError> {
        self.with_session(|s| s.uid_search_all()).await
    }

    async fn fetch_flags(&mut self, uid: u32) -> Result<Vec<String>, PostlinkError> {
        self.with_session(move |s| s.uid_fetch_flags(uid)).await
    }

    async fn fetch_message(&mut self, uid: u32) -> Result<InboxMessage, PostlinkError> {
        self.with_session(move |s| s.uid_fetch_message(uid)).await
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), PostlinkError> {
        self.with_session(move |s| s.uid_store_seen(uid)).await
    }

    async fn logout(&mut self) -> Result<(), PostlinkError> {
        let result = self.with_session(|s| s.logout()).await;
        self.session = None;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Replays canned server bytes and records what the client sent.
    struct Scripted {
        server: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Scripted {
        fn new(server: &str) -> Self {
            Self {
                server: Cursor::new(server.as_bytes().to_vec()),
                sent: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.server.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn sent(session: ImapSession<Scripted>) -> String {
        String::from_utf8(session.into_inner().sent).unwrap()
    }

    const GREETING: &str = "* OK IMAP4rev1 ready\r\n";

    #[test]
    fn login_select_and_search() {
        let script = format!(
            "{GREETING}\
             A1 OK LOGIN completed\r\n\
             * 3 EXISTS\r\n\
             * FLAGS (\\Seen \\Answered)\r\n\
             A2 OK [READ-WRITE] SELECT completed\r\n\
             * SEARCH 4 9 12\r\n\
             A3 OK SEARCH completed\r\n"
        );
        let mut s = ImapSession::new(Scripted::new(&script)).unwrap();
        s.login("news@example.org", "p\"w").unwrap();
        s.select("INBOX").unwrap();
        assert_eq!(s.uid_search_all().unwrap(), vec![4, 9, 12]);

        let out = sent(s);
        assert!(out.contains("A1 LOGIN \"news@example.org\" \"p\\\"w\"\r\n"), "{out}");
        assert!(out.contains("A2 SELECT \"INBOX\"\r\n"));
        assert!(out.contains("A3 UID SEARCH ALL\r\n"));
    }

    #[test]
    fn empty_search_yields_no_uids() {
        let script = format!("{GREETING}* SEARCH\r\nA1 OK done\r\n");
        let mut s = ImapSession::new(Scripted::new(&script)).unwrap();
        assert!(s.uid_search_all().unwrap().is_empty());
    }

    #[test]
    fn rejected_login_is_a_login_error() {
        let script = format!("{GREETING}A1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n");
        let mut s = ImapSession::new(Scripted::new(&script)).unwrap();
        let err = s.login("me", "wrong").unwrap_err();
        match err {
            PostlinkError::MailboxLogin { user, detail } => {
                assert_eq!(user, "me");
                assert!(detail.contains("Invalid credentials"));
                assert!(!detail.contains("wrong"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fetch_flags_ignores_unsolicited_fetches() {
        let script = format!(
            "{GREETING}\
             * 2 FETCH (FLAGS (\\Deleted) UID 5)\r\n\
             * 3 FETCH (UID 12 FLAGS (\\Seen \\Flagged))\r\n\
             A1 OK FETCH completed\r\n"
        );
        let mut s = ImapSession::new(Scripted::new(&script)).unwrap();
        assert_eq!(s.uid_fetch_flags(12).unwrap(), vec!["\\Seen", "\\Flagged"]);
        assert!(sent(s).contains("A1 UID FETCH 12 (FLAGS)\r\n"));
    }

    #[test]
    fn fetch_message_reads_literal_body() {
        let body = "Subject: hi\r\n\r\n<a href=\"x\">{not a literal}</a>\r\n";
        let script = format!(
            "{GREETING}\
             * 1 FETCH (UID 7 FLAGS () BODY[] {{{}}}\r\n{body})\r\n\
             A1 OK FETCH completed\r\n",
            body.len()
        );
        let mut s = ImapSession::new(Scripted::new(&script)).unwrap();
        let msg = s.uid_fetch_message(7).unwrap();
        assert_eq!(msg.uid, 7);
        assert!(msg.flags.is_empty());
        assert_eq!(msg.raw, body.as_bytes());
        assert!(sent(s).contains("A1 UID FETCH 7 (FLAGS BODY.PEEK[])\r\n"));
    }

    #[test]
    fn store_seen_is_silent() {
        let script = format!("{GREETING}A1 OK STORE completed\r\n");
        let mut s = ImapSession::new(Scripted::new(&script)).unwrap();
        s.uid_store_seen(9).unwrap();
        assert!(sent(s).contains("A1 UID STORE 9 +FLAGS.SILENT (\\Seen)\r\n"));
    }

    #[test]
    fn bad_greeting_is_rejected() {
        let err = ImapSession::new(Scripted::new("* BYE go away\r\n"))
            .err()
            .unwrap();
        assert!(matches!(err, PostlinkError::MailboxProtocol(_)));
    }

    #[test]
    fn closed_connection_is_a_protocol_error() {
        let mut s = ImapSession::new(Scripted::new(GREETING)).unwrap();
        let err = s.uid_search_all().unwrap_err();
        assert!(err.to_string().contains("connection closed"), "{err}");
    }

    #[test]
    fn line_breaks_in_arguments_are_refused() {
        assert!(quote("a\r\nA9 LOGOUT").is_err());
        assert_eq!(quote(r"a\b").unwrap(), r#""a\\b""#);
    }

    #[test]
    fn literal_len_parses_trailing_marker() {
        assert_eq!(literal_len("1 FETCH (BODY[] {42}"), Some((16, 42)));
        assert_eq!(literal_len("1 FETCH (FLAGS ())"), None);
    }
}
