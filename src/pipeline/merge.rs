//! Cover merging: prepend one personalised cover to the shared document.

use crate::document::{Artifacts, CoverTask, MergedDocument, RenderedDocument};
use crate::error::TaskError;
use crate::pipeline::pdf;
use tracing::info;

/// Merge `task.cover` in front of `base` and write `infomail-<stem>.pdf`.
///
/// `base` is only read; every task shares the same trimmed document.
pub async fn merge_cover(
    task: &CoverTask,
    base: &RenderedDocument,
    artifacts: &Artifacts,
) -> Result<MergedDocument, TaskError> {
    let merge_err = |detail: String| TaskError::Merge {
        cover: task.cover.clone(),
        detail,
    };

    let cover_bytes = tokio::fs::read(&task.cover)
        .await
        .map_err(|e| merge_err(format!("cannot read cover: {e}")))?;

    let out_path = artifacts.merged_pdf(&task.cover);
    let base_bytes = base.bytes.clone();
    let path = out_path.clone();
    let (bytes, page_count) = tokio::task::spawn_blocking(move || {
        let merged = pdf::concat(&[cover_bytes.as_slice(), base_bytes.as_slice()], &path)?;
        let count = pdf::page_count(&merged, &path)?;
        Ok::<_, crate::error::PostlinkError>((merged, count))
    })
    .await
    .map_err(|e| merge_err(format!("merge task panicked: {e}")))?
    .map_err(|e| merge_err(e.to_string()))?;

    tokio::fs::write(&out_path, &bytes)
        .await
        .map_err(|e| merge_err(format!("cannot write '{}': {e}", out_path.display())))?;

    info!("pdf created: '{}' ({} pages)", out_path.display(), page_count);
    Ok(MergedDocument {
        path: out_path,
        bytes,
        page_count,
    })
}
