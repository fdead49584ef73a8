//! Page-count limiter: hard-truncate the general document.
//!
//! Letters are billed per sheet, so anything past `pdf_max_pages` is dropped
//! before the document can reach the delivery provider. There is no
//! "continued" marker; the tail simply disappears.

use crate::document::RenderedDocument;
use crate::error::PostlinkError;
use crate::pipeline::pdf;
use tracing::{debug, info};

/// Trim `doc` to at most `max_pages` pages, rewriting its file on disk.
///
/// Returns `true` when pages were removed. A document already within the
/// limit is left untouched (same bytes, file not rewritten).
pub async fn limit_pages(doc: &mut RenderedDocument, max_pages: usize) -> Result<bool, PostlinkError> {
    if doc.page_count <= max_pages {
        debug!(
            "{} has {} pages (limit {}), nothing to trim",
            doc.path.display(),
            doc.page_count,
            max_pages
        );
        return Ok(false);
    }

    let bytes = doc.bytes.clone();
    let path = doc.path.clone();
    let trimmed = tokio::task::spawn_blocking(move || {
        let out = pdf::first_pages(&bytes, max_pages, &path)?;
        let count = pdf::page_count(&out, &path)?;
        Ok::<_, PostlinkError>((out, count))
    })
    .await
    .map_err(|e| PostlinkError::Internal(format!("Trim task panicked: {e}")))??;

    tokio::fs::write(&doc.path, &trimmed.0)
        .await
        .map_err(|e| PostlinkError::ArtifactWrite {
            path: doc.path.clone(),
            source: e,
        })?;

    info!("pdf shortened from {} to {} pages", doc.page_count, trimmed.1);
    doc.bytes = trimmed.0;
    doc.page_count = trimmed.1;
    Ok(true)
}
