//! What a run produced.

use crate::error::{PostlinkError, TaskError};
use serde::Serialize;
use std::path::PathBuf;

/// Why a run ended without rendering anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoOpReason {
    /// The mailbox held no messages.
    EmptyInbox,
    /// The newest message was already `\Seen`.
    AlreadyRead { uid: u32 },
    /// The newest message had no newsletter link. It is now `\Seen`.
    NoLink { uid: u32 },
}

impl std::fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoOpReason::EmptyInbox => write!(f, "inbox is empty"),
            NoOpReason::AlreadyRead { uid } => write!(f, "newest message (UID {uid}) already read"),
            NoOpReason::NoLink { uid } => write!(f, "message UID {uid} has no newsletter link"),
        }
    }
}

/// The general document as it left the limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub source_url: String,
    pub path: PathBuf,
    pub page_count: usize,
    /// Pages the limiter dropped.
    pub trimmed_pages: usize,
}

/// Outcome of one cover task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// 0-based position in `cover_letters`.
    pub index: usize,
    pub cover: PathBuf,
    /// Set once the merge succeeded.
    pub merged: Option<PathBuf>,
    /// Provider letter id. `None` if the task failed.
    pub order_id: Option<String>,
    pub error: Option<TaskError>,
    pub duration_ms: u64,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.order_id.is_some()
    }
}

/// Per-task results of a delivering run, in configured order.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub document: DocumentSummary,
    pub tasks: Vec<TaskResult>,
}

impl DeliveryReport {
    pub fn succeeded(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.tasks.len() - self.succeeded()
    }

    /// Letter ids of successful tasks, in task order.
    pub fn order_ids(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter_map(|t| t.order_id.as_deref())
            .collect()
    }

    /// `Err(PartialDelivery)` if any task failed.
    pub fn into_result(self) -> Result<Self, PostlinkError> {
        let failed = self.failed();
        if failed > 0 {
            return Err(PostlinkError::PartialDelivery {
                succeeded: self.succeeded(),
                failed,
                total: self.tasks.len(),
            });
        }
        Ok(self)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RunOutcome {
    NoOp(NoOpReason),
    /// Stopped after the limiter as requested.
    DryRun(DocumentSummary),
    Delivered(DeliveryReport),
}
