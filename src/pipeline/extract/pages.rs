//! Page-image recovery from converted documents.
//!
//! Image-only backends (Google Vision, vision LLMs) cannot read PDF. Every
//! page of a document produced by [`crate::pipeline::convert`] is a single
//! `/DCTDecode` image XObject, so the original JPEG bytes can be lifted back
//! out without rasterising anything.

use crate::error::BackendError;
use lopdf::{Dictionary, Document, Object};
use std::io;
use std::path::Path;
use tracing::debug;

/// JPEG bytes of every page image, in page order.
pub async fn page_images(document: &Path) -> Result<Vec<Vec<u8>>, BackendError> {
    let path = document.to_path_buf();
    tokio::task::spawn_blocking(move || page_images_blocking(&path))
        .await
        .map_err(|e| BackendError::Io(io::Error::other(e.to_string())))?
}

pub fn page_images_blocking(document: &Path) -> Result<Vec<Vec<u8>>, BackendError> {
    let doc = Document::load(document)
        .map_err(|e| BackendError::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string())))?;

    let mut images = Vec::new();
    for page_id in doc.get_pages().into_values() {
        let Ok(page) = doc.get_dictionary(page_id) else {
            continue;
        };
        let Some(xobjects) = resolve_dict(&doc, page, b"Resources")
            .and_then(|resources| resolve_dict(&doc, resources, b"XObject"))
        else {
            continue;
        };
        for (_, obj) in xobjects.iter() {
            if let Ok((_, Object::Stream(stream))) = doc.dereference(obj) {
                if is_jpeg_image(&stream.dict) {
                    images.push(stream.content.clone());
                }
            }
        }
    }

    if images.is_empty() {
        return Err(BackendError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no JPEG page images in '{}'", document.display()),
        )));
    }
    debug!("Recovered {} page image(s) from {}", images.len(), document.display());
    Ok(images)
}

fn resolve_dict<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    let obj = dict.get(key).ok()?;
    let (_, obj) = doc.dereference(obj).ok()?;
    obj.as_dict().ok()
}

fn is_jpeg_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(n)) if n.as_slice() == b"Image")
        && matches!(dict.get(b"Filter"), Ok(Object::Name(n)) if n.as_slice() == b"DCTDecode")
}
