//! CLI binary for postlink.
//!
//! A thin shim over the library crate: load the config, run once, report.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use postlink::{run, Config, ProgressCallback, RunOptions, RunOutcome, RunProgressCallback, Stage};
use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner showing the current stage, with one line per delivered cover.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("postlink");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: Stage) {
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_task_start(&self, index: usize, total: usize) {
        self.bar
            .set_message(format!("delivering letter {}/{}…", index + 1, total));
    }

    fn on_task_complete(&self, index: usize, total: usize, order_id: &str) {
        self.bar.println(format!(
            "  {} Letter {:>2}/{:<2}  {}",
            green("✓"),
            index + 1,
            total,
            dim(order_id)
        ));
    }

    fn on_task_error(&self, index: usize, total: usize, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Letter {:>2}/{:<2}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg)
        ));
    }

    fn on_run_complete(&self, _total: usize, _succeeded: usize) {
        self.bar.finish_and_clear();
    }
}

/// The library reports completion itself only after a delivery round.
fn completion_reported<E>(outcome: &Result<RunOutcome, E>) -> bool {
    matches!(outcome, Ok(RunOutcome::Delivered(_)))
}

/// Turn the newest unread newsletter email into posted letters.
#[derive(Parser, Debug)]
#[command(
    name = "postlink",
    version,
    about = "Turn the newest unread newsletter email into letters sent via Pingen",
    long_about = "Reads the newest message in the configured IMAP mailbox, renders the \
newsletter it links to as an A4 PDF, trims it to the configured page count, prepends each \
cover letter and submits every result to Pingen.\n\n\
Configuration is read from config.yaml in the current directory, or from the file named by \
POSTLINK_CONFIG."
)]
struct Cli {
    /// Render and trim the PDF, but skip the upload command and delivery.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces info-level chatter on an interactive terminal.
    let show_progress = io::stderr().is_terminal();
    let filter = if show_progress { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Load config ──────────────────────────────────────────────────────
    let path = Config::default_path();
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };
    let options = RunOptions {
        dry_run: cli.dry_run,
        progress_callback: progress_cb.clone(),
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let outcome = run(&config, &options).await;
    if let Some(cb) = &progress_cb {
        if !completion_reported(&outcome) {
            cb.on_run_complete(0, 0);
        }
    }

    match outcome.context("postlink run failed")? {
        RunOutcome::NoOp(reason) => {
            eprintln!("{} nothing to do: {reason}", dim("–"));
        }
        RunOutcome::DryRun(doc) => {
            eprintln!(
                "{} dry run: {} ({} pages, {} trimmed)",
                green("✔"),
                bold(&doc.path.display().to_string()),
                doc.page_count,
                doc.trimmed_pages
            );
        }
        RunOutcome::Delivered(report) => {
            for task in &report.tasks {
                match (&task.order_id, &task.error) {
                    (Some(id), _) => println!("{}\t{id}", task.cover.display()),
                    (None, Some(e)) => eprintln!("{} {}: {e}", red("✗"), task.cover.display()),
                    (None, None) => {}
                }
            }
            eprintln!(
                "{} {}/{} letters created",
                if report.failed() == 0 { green("✔") } else { red("✘") },
                report.succeeded(),
                report.tasks.len()
            );
            report
                .into_result()
                .context("Not every cover letter was delivered")?;
        }
    }

    Ok(())
}
