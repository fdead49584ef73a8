//! Pipeline orchestrator: one run, start to finish.
//!
//! ```text
//! SCAN ─┬─▶ exit: empty / already read / no link
//!       └─▶ RENDER ─▶ LIMIT ─┬─▶ exit: dry run
//!                            └─▶ UPLOAD HOOK ─▶ for each cover: MERGE ─▶ SUBMIT
//! ```
//!
//! Every stage is awaited before the next begins. Fatal errors end the run
//! immediately; cover-task errors are recorded and the next task runs.

use crate::config::Config;
use crate::document::{Artifacts, CoverTask, RenderedDocument};
use crate::error::{PostlinkError, TaskError};
use crate::output::{DeliveryReport, DocumentSummary, NoOpReason, RunOutcome, TaskResult};
use crate::pipeline::deliver::{Deliver, PingenClient};
use crate::pipeline::imap::ImapConnector;
use crate::pipeline::mailbox::MailboxConnector;
use crate::pipeline::render::{self, BrowserLauncher, ChromiumLauncher};
use crate::pipeline::rewrite::{self, TextTransform};
use crate::pipeline::scan::{self, ActionableLink, LinkFilter, ScanOutcome};
use crate::pipeline::shell::{ShellUpload, UploadHook};
use crate::pipeline::{limit, merge};
use crate::progress::{NoopProgressCallback, ProgressCallback, Stage};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-invocation switches that are not part of the configuration file.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Stop after the page limiter: no upload command, no delivery.
    pub dry_run: bool,
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("dry_run", &self.dry_run)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

/// The external systems a run talks to.
pub struct Collaborators {
    pub mailbox: Box<dyn MailboxConnector>,
    pub browser: Box<dyn BrowserLauncher>,
    pub rewriter: Box<dyn TextTransform>,
    /// `None` when no upload command is configured.
    pub upload: Option<Box<dyn UploadHook>>,
    pub delivery: Box<dyn Deliver>,
}

impl Collaborators {
    /// Production wiring: IMAP, Chromium, the configured rewrite engine,
    /// the shell hook and Pingen.
    pub fn from_config(config: &Config) -> Result<Self, PostlinkError> {
        let artifacts = Artifacts::new(&config.workdir);
        Ok(Self {
            mailbox: Box::new(ImapConnector::new(config.imap.clone())),
            browser: Box::new(ChromiumLauncher::new(config.browser.clone())),
            rewriter: rewrite::transform_for(&config.generate, &artifacts),
            upload: ShellUpload::from_config(config.upload.as_ref(), config.workdir.clone())
                .map(|hook| Box::new(hook) as Box<dyn UploadHook>),
            delivery: Box::new(PingenClient::new(config.pingen.clone())?),
        })
    }
}

/// A stage either hands its product on or ends the run quietly.
enum Flow<T> {
    Continue(T),
    Exit(NoOpReason),
}

/// Run the pipeline with production collaborators.
pub async fn run(config: &Config, options: &RunOptions) -> Result<RunOutcome, PostlinkError> {
    run_with(config, options, Collaborators::from_config(config)?).await
}

/// Run the pipeline against the given collaborators.
///
/// # Errors
/// Returns `Err(PostlinkError)` for fatal errors only. Cover-task failures
/// are reported inside [`RunOutcome::Delivered`]; call
/// [`DeliveryReport::into_result`] to treat them as an error.
pub async fn run_with(
    config: &Config,
    options: &RunOptions,
    collaborators: Collaborators,
) -> Result<RunOutcome, PostlinkError> {
    let progress: ProgressCallback = options
        .progress_callback
        .clone()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback));
    let artifacts = Artifacts::new(&config.workdir);
    tokio::fs::create_dir_all(artifacts.workdir())
        .await
        .map_err(|e| PostlinkError::ArtifactWrite {
            path: artifacts.workdir().to_path_buf(),
            source: e,
        })?;

    // ── Step 1: Scan ─────────────────────────────────────────────────────
    progress.on_stage(Stage::Scan);
    let link = match scan_stage(collaborators.mailbox.as_ref(), config).await? {
        Flow::Continue(link) => link,
        Flow::Exit(reason) => {
            info!("Nothing to do: {reason}");
            return Ok(RunOutcome::NoOp(reason));
        }
    };

    // ── Step 2: Render ───────────────────────────────────────────────────
    progress.on_stage(Stage::Render);
    let mut document = render_stage(
        collaborators.browser.as_ref(),
        collaborators.rewriter.as_ref(),
        &link,
        config,
        &artifacts,
    )
    .await?;

    // ── Step 3: Limit ────────────────────────────────────────────────────
    progress.on_stage(Stage::Limit);
    let rendered_pages = document.page_count;
    limit::limit_pages(&mut document, config.generate.pdf_max_pages).await?;
    let summary = DocumentSummary {
        source_url: link.url.to_string(),
        path: document.path.clone(),
        page_count: document.page_count,
        trimmed_pages: rendered_pages.saturating_sub(document.page_count),
    };

    if options.dry_run {
        info!(
            "Dry run: '{}' ready ({} pages), skipping upload and delivery",
            summary.path.display(),
            summary.page_count
        );
        return Ok(RunOutcome::DryRun(summary));
    }

    // ── Step 4: Upload hook ──────────────────────────────────────────────
    match &collaborators.upload {
        Some(hook) => {
            progress.on_stage(Stage::UploadHook);
            hook.run().await?;
        }
        None => debug!("No upload command configured"),
    }

    // ── Step 5: Cover tasks ──────────────────────────────────────────────
    progress.on_stage(Stage::Deliver);
    let tasks = CoverTask::from_paths(&config.cover_letters);
    if tasks.is_empty() {
        info!("No cover letters configured, nothing to deliver");
    }
    let total = tasks.len();
    let mut results = Vec::with_capacity(total);
    for task in &tasks {
        progress.on_task_start(task.index, total);
        let result = run_task(
            task,
            &document,
            &artifacts,
            collaborators.delivery.as_ref(),
        )
        .await;
        match (&result.order_id, &result.error) {
            (Some(id), _) => {
                info!("Letter created at pingen: {id}");
                progress.on_task_complete(task.index, total, id);
            }
            (None, Some(e)) => {
                warn!("Cover '{}' not delivered: {e}", task.cover.display());
                progress.on_task_error(task.index, total, &e.to_string());
            }
            (None, None) => {}
        }
        results.push(result);
    }

    let report = DeliveryReport {
        document: summary,
        tasks: results,
    };
    info!(
        "Run complete: {}/{} letters created",
        report.succeeded(),
        total
    );
    progress.on_run_complete(total, report.succeeded());
    Ok(RunOutcome::Delivered(report))
}

// ── Stages ───────────────────────────────────────────────────────────────

/// Connect, scan and log out. The session never outlives this stage.
async fn scan_stage(
    connector: &dyn MailboxConnector,
    config: &Config,
) -> Result<Flow<ActionableLink>, PostlinkError> {
    let mut mailbox = connector.connect().await?;
    let filter = LinkFilter::new(&config.generate.link_domain);
    let scanned = scan::scan_inbox(mailbox.as_mut(), &filter).await;
    if let Err(e) = mailbox.logout().await {
        warn!("Mailbox logout failed: {e}");
    }

    Ok(match scanned? {
        ScanOutcome::Empty => Flow::Exit(NoOpReason::EmptyInbox),
        ScanOutcome::AlreadyRead { uid } => Flow::Exit(NoOpReason::AlreadyRead { uid }),
        ScanOutcome::NoLink { uid } => Flow::Exit(NoOpReason::NoLink { uid }),
        ScanOutcome::Found(link) => Flow::Continue(link),
    })
}

/// Launch, render, and close the browser whatever happened.
async fn render_stage(
    launcher: &dyn BrowserLauncher,
    rewriter: &dyn TextTransform,
    link: &ActionableLink,
    config: &Config,
    artifacts: &Artifacts,
) -> Result<RenderedDocument, PostlinkError> {
    info!("Rendering {}", link.url);
    let mut session = launcher.launch().await?;
    let rendered =
        render::render_document(session.as_mut(), &link.url, rewriter, &config.generate, artifacts)
            .await;
    if let Err(e) = session.close().await {
        warn!("Browser did not close cleanly: {e}");
    }
    rendered
}

/// Merge then submit one cover. Never fails the run.
async fn run_task(
    task: &CoverTask,
    document: &RenderedDocument,
    artifacts: &Artifacts,
    delivery: &dyn Deliver,
) -> TaskResult {
    let start = Instant::now();
    let mut result = TaskResult {
        index: task.index,
        cover: task.cover.clone(),
        merged: None,
        order_id: None,
        error: None,
        duration_ms: 0,
    };

    let outcome: Result<String, TaskError> = async {
        let merged = merge::merge_cover(task, document, artifacts).await?;
        result.merged = Some(merged.path.clone());
        let order = delivery.submit(&merged).await?;
        Ok(order.id)
    }
    .await;

    match outcome {
        Ok(id) => result.order_id = Some(id),
        Err(e) => result.error = Some(e),
    }
    result.duration_ms = start.elapsed().as_millis() as u64;
    result
}
