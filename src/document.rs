//! Documents flowing through the pipeline and where they land on disk.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Raw HTML captured from the newsletter page.
pub const ORIGINAL_HTML_FILE: &str = "original-infomail.html";
/// HTML after the rewrite rules ran.
pub const CLEANED_HTML_FILE: &str = "cleaned-infomail.html";
/// Rule file handed to the external `sed` engine.
pub const REWRITE_SCRIPT_FILE: &str = "sed_script.sed";
/// The general (cover-less) document.
pub const GENERAL_PDF_FILE: &str = "infomail.pdf";

/// Paths of every intermediate artifact, rooted at the configured workdir.
#[derive(Debug, Clone)]
pub struct Artifacts {
    workdir: PathBuf,
}

impl Artifacts {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn original_html(&self) -> PathBuf {
        self.workdir.join(ORIGINAL_HTML_FILE)
    }

    pub fn cleaned_html(&self) -> PathBuf {
        self.workdir.join(CLEANED_HTML_FILE)
    }

    pub fn rewrite_script(&self) -> PathBuf {
        self.workdir.join(REWRITE_SCRIPT_FILE)
    }

    pub fn general_pdf(&self) -> PathBuf {
        self.workdir.join(GENERAL_PDF_FILE)
    }

    /// `infomail-<cover stem>.pdf` for the given cover document.
    pub fn merged_pdf(&self, cover: &Path) -> PathBuf {
        let stem = cover
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cover".to_string());
        self.workdir.join(format!("infomail-{stem}.pdf"))
    }
}

/// The rendered general document.
///
/// Produced once per run by the renderer; the page limiter may replace
/// `bytes` and `page_count` in place. Read-only from then on.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// One cover letter to prepend to the general document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverTask {
    /// 0-based position in `cover_letters`.
    pub index: usize,
    pub cover: PathBuf,
}

impl CoverTask {
    /// Build the task list from the configured cover paths, preserving order.
    pub fn from_paths(paths: &[PathBuf]) -> Vec<CoverTask> {
        paths
            .iter()
            .enumerate()
            .map(|(index, cover)| CoverTask {
                index,
                cover: cover.clone(),
            })
            .collect()
    }
}

/// Cover pages followed by the general document's pages.
#[derive(Debug, Clone)]
pub struct MergedDocument {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

impl MergedDocument {
    /// File name reported to the delivery provider.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "letter.pdf".to_string())
    }
}
