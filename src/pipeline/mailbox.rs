//! Mailbox seam: the few operations the inbox scanner needs.
//!
//! [`crate::pipeline::imap`] implements it over a real IMAP server; tests
//! substitute an in-memory mailbox.

use crate::error::PostlinkError;
use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders};

/// IMAP system flag marking a message as read.
pub const SEEN_FLAG: &str = "\\Seen";

/// One message as fetched from the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxMessage {
    pub uid: u32,
    pub flags: Vec<String>,
    /// Full RFC 5322 source.
    pub raw: Vec<u8>,
}

impl InboxMessage {
    pub fn is_seen(&self) -> bool {
        has_seen_flag(&self.flags)
    }

    /// The first `text/html` part, decoded. `None` for plain-text mails.
    ///
    /// `Message::body_html` would synthesise HTML from a text part, which
    /// is not what the link scanner wants.
    pub fn html_body(&self) -> Option<String> {
        let parsed = MessageParser::default().parse(&self.raw)?;
        parsed
            .parts
            .iter()
            .find(|part| {
                part.content_type().is_some_and(|ct| {
                    ct.ctype().eq_ignore_ascii_case("text")
                        && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("html"))
                })
            })
            .and_then(|part| part.text_contents())
            .map(str::to_string)
    }

    pub fn subject(&self) -> Option<String> {
        let parsed = MessageParser::default().parse(&self.raw)?;
        parsed.subject().map(str::to_string)
    }
}

pub fn has_seen_flag(flags: &[String]) -> bool {
    flags.iter().any(|f| f.eq_ignore_ascii_case(SEEN_FLAG))
}

/// An open, authenticated session with the notification mailbox selected.
#[async_trait]
pub trait Mailbox: Send {
    /// Every message UID in the mailbox, ascending.
    async fn list_all(&mut self) -> Result<Vec<u32>, PostlinkError>;

    async fn fetch_flags(&mut self, uid: u32) -> Result<Vec<String>, PostlinkError>;

    /// Fetch flags and source without setting `\Seen` as a side effect.
    async fn fetch_message(&mut self, uid: u32) -> Result<InboxMessage, PostlinkError>;

    async fn mark_seen(&mut self, uid: u32) -> Result<(), PostlinkError>;

    async fn logout(&mut self) -> Result<(), PostlinkError>;
}

/// Opens [`Mailbox`] sessions.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Mailbox>, PostlinkError>;
}
