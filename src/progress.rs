//! Progress-callback trait for run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::run::RunOptions::progress_callback`] to observe the pipeline as
//! it moves through its stages and cover tasks. The CLI uses it to drive a
//! spinner; library users can forward events anywhere.
//!
//! # Example
//!
//! ```rust
//! use postlink::{RunProgressCallback, Stage};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct StageLog(Mutex<Vec<Stage>>);
//!
//! impl RunProgressCallback for StageLog {
//!     fn on_stage(&self, stage: Stage) {
//!         self.0.lock().unwrap().push(stage);
//!     }
//! }
//!
//! let log = Arc::new(StageLog::default());
//! let cb: Arc<dyn RunProgressCallback> = log.clone();
//! cb.on_stage(Stage::Scan);
//! assert_eq!(*log.0.lock().unwrap(), vec![Stage::Scan]);
//! ```

use std::fmt;
use std::sync::Arc;

/// Pipeline stage, reported as it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scan,
    Render,
    Limit,
    UploadHook,
    Deliver,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Scan => "scanning inbox",
            Stage::Render => "rendering newsletter",
            Stage::Limit => "limiting pages",
            Stage::UploadHook => "running upload command",
            Stage::Deliver => "delivering letters",
        };
        f.write_str(label)
    }
}

/// Called by the orchestrator as the run progresses.
///
/// All methods default to no-ops so implementations only override what
/// they care about. Tasks run sequentially, so calls never overlap.
pub trait RunProgressCallback: Send + Sync {
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Before merging cover `index` (0-based) of `total`.
    fn on_task_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    fn on_task_complete(&self, index: usize, total: usize, order_id: &str) {
        let _ = (index, total, order_id);
    }

    fn on_task_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Once after every task was attempted.
    fn on_run_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn RunProgressCallback>;
