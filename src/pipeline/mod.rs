//! Pipeline stages for newsletter-to-letter delivery.
//!
//! Each submodule implements one step. Stages that touch the outside world
//! do so through a trait, so the orchestrator can be driven entirely by
//! in-memory fakes.
//!
//! ## Data Flow
//!
//! ```text
//! scan ──▶ render ──▶ limit ──▶ shell ──▶ merge ──▶ deliver
//! (IMAP)   (Chromium   (lopdf)  (hook)    (lopdf)   (Pingen)
//!           + rewrite)                    └── once per cover ──┘
//! ```
//!
//! 1. [`scan`]: newest unread message → newsletter URL; marks it `\Seen`.
//!    [`mailbox`] is the seam, [`imap`] the wire client
//! 2. [`render`]: load, rewrite via [`rewrite`], reload, style, print A4
//! 3. [`limit`]: truncate to the configured page count ([`pdf`] does the
//!    lopdf work on the blocking pool)
//! 4. [`shell`]: operator upload command, once, before any delivery
//! 5. [`merge`]: cover pages + general document, one file per cover
//! 6. [`deliver`]: token, upload slot, PUT, letter creation

pub mod deliver;
pub mod imap;
pub mod limit;
pub mod mailbox;
pub mod merge;
pub mod pdf;
pub mod render;
pub mod rewrite;
pub mod scan;
pub mod shell;
