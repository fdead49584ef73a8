//! Error types for the postlink pipeline.
//!
//! Two distinct error types reflect two distinct failure scopes:
//!
//! * [`PostlinkError`]: **Fatal**: the run cannot proceed at all (bad
//!   config, mailbox unreachable, browser navigation failed, upload command
//!   exited non-zero). Returned as `Err(PostlinkError)` from [`crate::run`].
//!
//! * [`TaskError`]: **Per cover task**: merging one cover letter or
//!   submitting one letter to the delivery provider failed, but sibling
//!   tasks are unaffected. Stored inside [`crate::output::TaskResult`] so the
//!   caller sees exactly which covers were posted and which were not.
//!
//! The three "nothing to do" exits (empty inbox, newest message already
//! read, no newsletter link) are not errors at all; they surface as
//! [`crate::output::RunOutcome::NoOp`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the postlink library.
#[derive(Debug, Error)]
pub enum PostlinkError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// The configuration file could not be read.
    #[error("Failed to read config '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for [`crate::Config`].
    #[error("Failed to parse config '{path}': {detail}")]
    ConfigParse { path: PathBuf, detail: String },

    /// Validation of a parsed configuration failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Mailbox errors ────────────────────────────────────────────────────
    /// TCP or TLS connection to the IMAP server failed.
    #[error("Cannot connect to mailbox {host}:{port}: {detail}")]
    MailboxConnect {
        host: String,
        port: u16,
        detail: String,
    },

    /// The server rejected the credentials.
    #[error("Mailbox login rejected for '{user}': {detail}")]
    MailboxLogin { user: String, detail: String },

    /// The server answered a command with NO/BAD, or the session broke.
    #[error("Mailbox protocol error: {0}")]
    MailboxProtocol(String),

    // ── Render errors ─────────────────────────────────────────────────────
    /// Loading the newsletter page (or the cleaned local copy) failed.
    #[error("Failed to load '{url}': {detail}")]
    Navigation { url: String, detail: String },

    /// Any other headless-browser failure (launch, content capture, print).
    #[error("Browser error: {0}")]
    Browser(String),

    /// Applying the HTML rewrite rules failed.
    #[error("HTML rewrite failed: {0}")]
    Rewrite(String),

    /// The rewrite rule set itself is malformed.
    #[error("Invalid rewrite rule on line {line}: {detail}")]
    InvalidRewriteRule { line: usize, detail: String },

    // ── Document errors ───────────────────────────────────────────────────
    /// A PDF could not be parsed or rebuilt.
    #[error("PDF error for '{path}': {detail}")]
    Pdf { path: PathBuf, detail: String },

    /// Could not create or write an intermediate artifact.
    #[error("Failed to write '{path}': {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Delivery errors ───────────────────────────────────────────────────
    /// The operator's upload command failed; no cover task was attempted.
    #[error("Upload command `{cmd}` failed: {detail}")]
    UploadCommand { cmd: String, detail: String },

    /// Every cover task was attempted but at least one did not produce a letter.
    ///
    /// Returned by [`crate::output::DeliveryReport::into_result`].
    #[error("{failed}/{total} cover tasks failed")]
    PartialDelivery {
        succeeded: usize,
        failed: usize,
        total: usize,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failure scoped to a single cover task.
///
/// Stored in [`crate::output::TaskResult`]; the orchestrator moves on to the
/// next cover task after recording it.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum TaskError {
    /// The cover letter could not be merged with the general document.
    #[error("merging cover '{cover}' failed: {detail}")]
    Merge { cover: PathBuf, detail: String },

    /// Exchanging client credentials for an access token failed.
    #[error("access token request failed: {detail}")]
    Token { detail: String },

    /// Requesting the one-time upload URL failed.
    #[error("upload URL request failed: {detail}")]
    UploadUrl { detail: String },

    /// PUT of the document bytes to the upload URL failed.
    #[error("document upload failed: {detail}")]
    Upload { detail: String },

    /// The letter-creation call failed.
    #[error("letter creation failed: {detail}")]
    CreateLetter { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_delivery_display() {
        let e = PostlinkError::PartialDelivery {
            succeeded: 1,
            failed: 1,
            total: 2,
        };
        assert!(e.to_string().contains("1/2"), "got: {e}");
    }

    #[test]
    fn invalid_rule_display_names_line() {
        let e = PostlinkError::InvalidRewriteRule {
            line: 3,
            detail: "unknown command 'y'".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("unknown command"));
    }

    #[test]
    fn mailbox_connect_display() {
        let e = PostlinkError::MailboxConnect {
            host: "imap.example.org".into(),
            port: 993,
            detail: "connection refused".into(),
        };
        assert!(e.to_string().contains("imap.example.org:993"));
    }

    #[test]
    fn task_error_roundtrips_through_json() {
        let e = TaskError::CreateLetter {
            detail: "HTTP 422".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: TaskError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), e.to_string());
    }
}
