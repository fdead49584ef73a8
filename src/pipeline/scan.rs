//! Inbox scanner: pick the single newest message and pull its newsletter link.
//!
//! The message is marked `\Seen` before the scanner returns whenever it was
//! unread, link or no link. A crash later in the run therefore never causes
//! the same newsletter to be posted twice.

use crate::error::PostlinkError;
use crate::pipeline::mailbox::{has_seen_flag, Mailbox};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// The newsletter link found in the newest message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionableLink {
    pub uid: u32,
    pub url: Url,
    pub subject: Option<String>,
}

/// What the scan found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The mailbox holds no messages.
    Empty,
    /// The newest message was already read by an earlier run.
    AlreadyRead { uid: u32 },
    /// The newest message was unread but links nowhere useful; it is now `\Seen`.
    NoLink { uid: u32 },
    /// An unread newsletter; it is now `\Seen`.
    Found(ActionableLink),
}

/// Accepts URLs pointing at the newsletter domain or one of its subdomains.
#[derive(Debug, Clone)]
pub struct LinkFilter {
    domain: String,
}

impl LinkFilter {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.trim().trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn accepts(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        host == self.domain
            || host
                .strip_suffix(&self.domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

/// Every absolute `a[href]` target in document order.
///
/// Relative and unparsable hrefs are dropped; a newsletter link is always
/// absolute.
pub fn extract_links(html: &str) -> Vec<Url> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| Url::parse(href.trim()).ok())
        .collect()
}

/// Scan the mailbox and consume its newest message if it is unread.
pub async fn scan_inbox(
    mailbox: &mut dyn Mailbox,
    filter: &LinkFilter,
) -> Result<ScanOutcome, PostlinkError> {
    let uids = mailbox.list_all().await?;
    // UIDs ascend with arrival order, so the last one is the newest.
    let Some(&uid) = uids.last() else {
        info!("inbox is empty, nothing to do");
        return Ok(ScanOutcome::Empty);
    };
    debug!("{} messages, newest is UID {uid}", uids.len());

    let flags = mailbox.fetch_flags(uid).await?;
    if has_seen_flag(&flags) {
        info!("newest message (UID {uid}) already read, nothing to do");
        return Ok(ScanOutcome::AlreadyRead { uid });
    }

    let message = mailbox.fetch_message(uid).await?;
    let subject = message.subject();
    let link = message
        .html_body()
        .map(|html| extract_links(&html))
        .unwrap_or_default()
        .into_iter()
        .find(|url| filter.accepts(url));

    mailbox.mark_seen(uid).await?;

    match link {
        Some(url) => {
            info!(
                "newsletter '{}' links to {url}",
                subject.as_deref().unwrap_or("(no subject)")
            );
            Ok(ScanOutcome::Found(ActionableLink { uid, url, subject }))
        }
        None => {
            warn!(
                "unread message UID {uid} ('{}') has no {} link; marked read and skipped",
                subject.as_deref().unwrap_or("(no subject)"),
                filter.domain
            );
            Ok(ScanOutcome::NoLink { uid })
        }
    }
}
