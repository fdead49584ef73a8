//! # postlink
//!
//! Turn a newsletter email into physical mail.
//!
//! A newsletter platform (Mailchimp) notifies a mailbox whenever a new issue
//! is published. postlink picks up the newest such notification, renders the
//! issue it links to as a print-ready PDF, prepends a personal cover letter
//! for each recipient and hands every letter to a print-and-post provider
//! (Pingen).
//!
//! ## Pipeline Overview
//!
//! ```text
//! IMAP mailbox
//!  │
//!  ├─ 1. Scan     newest message → unread? → first mailchi.mp link; mark \Seen
//!  ├─ 2. Render   headless Chromium: load, rewrite HTML, reload, style, print A4
//!  ├─ 3. Limit    keep the first `pdf_max_pages` pages (lopdf, spawn_blocking)
//!  ├─ 4. Hook     operator's upload command, once
//!  └─ 5. Deliver  per cover letter: merge → token → upload → create letter
//! ```
//!
//! A run acts on at most one message. A message that was already read, or
//! an empty mailbox, ends the run as a successful no-op, so the binary can
//! be scheduled from cron without bookkeeping.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use postlink::{run, Config, RunOptions, RunOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     match run(&config, &RunOptions::default()).await? {
//!         RunOutcome::NoOp(reason) => eprintln!("nothing to do: {reason}"),
//!         RunOutcome::DryRun(doc) => eprintln!("{} pages", doc.page_count),
//!         RunOutcome::Delivered(report) => {
//!             for id in report.order_ids() {
//!                 println!("letter {id}");
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `postlink` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when embedding the pipeline as a library:
//! ```toml
//! postlink = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Config, GenerateConfig, ImapConfig, PingenConfig, RewriteEngine, UploadConfig};
pub use document::{Artifacts, CoverTask, MergedDocument, RenderedDocument};
pub use error::{PostlinkError, TaskError};
pub use output::{DeliveryReport, DocumentSummary, NoOpReason, RunOutcome, TaskResult};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback, Stage};
pub use run::{run, run_with, Collaborators, RunOptions};
