//! Page-level PDF surgery on top of `lopdf`.
//!
//! Trimming and cover merging are the same operation: collect an ordered
//! list of page objects from one or more source documents and hang them
//! under a fresh page tree. Source catalogs and intermediate `Pages` nodes
//! are dropped, so attributes a page inherits from its ancestors are copied
//! onto the page itself first. Objects that end up unreferenced (pages past
//! the limit, old outlines) are pruned before saving.
//!
//! Everything here is synchronous and CPU-bound; async callers go through
//! `spawn_blocking`.

use crate::error::PostlinkError;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::path::Path;

/// Page attributes a page may inherit from its `Pages` ancestors.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Guard against cyclic `Parent` chains in malformed files.
const MAX_TREE_DEPTH: usize = 64;

fn pdf_err(path: &Path, e: impl std::fmt::Display) -> PostlinkError {
    PostlinkError::Pdf {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Parse `bytes` and return the number of pages.
pub fn page_count(bytes: &[u8], path: &Path) -> Result<usize, PostlinkError> {
    let doc = Document::load_mem(bytes).map_err(|e| pdf_err(path, e))?;
    Ok(doc.get_pages().len())
}

/// Rebuild `bytes` keeping only the first `max_pages` pages, in order.
pub fn first_pages(bytes: &[u8], max_pages: usize, path: &Path) -> Result<Vec<u8>, PostlinkError> {
    let doc = Document::load_mem(bytes).map_err(|e| pdf_err(path, e))?;
    assemble(vec![(doc, max_pages)], path)
}

/// Concatenate every page of every part, in argument order.
///
/// `path` is only used to label errors (it is the output file).
pub fn concat(parts: &[&[u8]], path: &Path) -> Result<Vec<u8>, PostlinkError> {
    let docs = parts
        .iter()
        .map(|bytes| {
            Document::load_mem(bytes)
                .map(|doc| (doc, usize::MAX))
                .map_err(|e| pdf_err(path, e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    assemble(docs, path)
}

/// Build a new document from the first `take` pages of each source.
fn assemble(sources: Vec<(Document, usize)>, path: &Path) -> Result<Vec<u8>, PostlinkError> {
    let mut merged = Document::with_version("1.7");
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();

    for (mut doc, take) in sources {
        // Shift ids past everything already merged so nothing collides.
        doc.renumber_objects_with(merged.max_id + 1);

        for page_id in doc.get_pages().into_values().take(take) {
            pages.push((page_id, flatten_page(&doc, page_id, path)?));
        }

        let highest = doc.objects.keys().map(|(id, _)| *id).max().unwrap_or(0);
        merged.max_id = merged.max_id.max(highest);
        for (id, object) in doc.objects {
            if !is_tree_node(&object) {
                merged.objects.insert(id, object);
            }
        }
    }

    if pages.is_empty() {
        return Err(pdf_err(path, "document has no pages"));
    }

    let pages_id = merged.new_object_id();
    let kids: Vec<Object> = pages.iter().map(|(id, _)| Object::Reference(*id)).collect();
    let count = pages.len() as i64;

    for (id, mut dict) in pages {
        dict.set("Parent", Object::Reference(pages_id));
        merged.objects.insert(id, Object::Dictionary(dict));
    }
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);
    merged.prune_objects();

    let mut out = Vec::new();
    merged.save_to(&mut out).map_err(|e| pdf_err(path, e))?;
    Ok(out)
}

/// Catalogs and page-tree nodes are rebuilt, never copied.
fn is_tree_node(object: &Object) -> bool {
    match object {
        Object::Dictionary(dict) => dict
            .get(b"Type")
            .and_then(Object::as_name)
            .map(|name| name == b"Catalog" || name == b"Pages" || name == b"Page")
            .unwrap_or(false),
        _ => false,
    }
}

/// Clone a page dictionary with its inherited attributes made explicit.
fn flatten_page(doc: &Document, page_id: ObjectId, path: &Path) -> Result<Dictionary, PostlinkError> {
    let mut page = doc
        .get_dictionary(page_id)
        .map_err(|e| pdf_err(path, e))?
        .clone();

    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;
    while let Some(parent_id) = parent {
        depth += 1;
        if depth > MAX_TREE_DEPTH {
            return Err(pdf_err(path, "page tree too deep or cyclic"));
        }
        let node = doc.get_dictionary(parent_id).map_err(|e| pdf_err(path, e))?;
        for key in INHERITABLE {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key, value.clone());
                }
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    Ok(page)
}
