//! Document decoding.
//!
//! The decoder is the only place that knows about the PDF object model. It
//! exposes page geometry and page content through [`DecodedDocument`] so the
//! renderer can work page by page without holding format details.

use std::collections::BTreeMap;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, warn};

use crate::LoadError;

/// Page size used when a page declares no media box anywhere in its tree.
const DEFAULT_PAGE_SIZE: (f64, f64) = (612.0, 792.0);

/// Maximum `Parent` links followed when looking up inherited attributes.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// A decoded, page-addressable document.
pub trait DecodedDocument: Send {
    /// Number of pages.
    fn page_count(&self) -> u32;

    /// Native `(width, height)` of a 1-based page, in points.
    fn page_size(&self, page_number: u32) -> Result<(f64, f64), LoadError>;

    /// Text content of a 1-based page.
    fn page_text(&self, page_number: u32) -> Result<String, LoadError>;
}

/// Turns fetched bytes into a [`DecodedDocument`].
pub trait DocumentDecoder: Send + Sync {
    /// Decodes a complete document body.
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn DecodedDocument>, LoadError>;
}

/// PDF decoder backed by lopdf.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfDecoder;

impl PdfDecoder {
    /// Returns true if `bytes` carry the PDF header.
    #[must_use]
    pub fn looks_like_pdf(bytes: &[u8]) -> bool {
        let start = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(bytes.len());
        bytes[start..].starts_with(b"%PDF-")
    }
}

impl DocumentDecoder for PdfDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn DecodedDocument>, LoadError> {
        if !Self::looks_like_pdf(bytes) {
            return Err(LoadError::UnsupportedFormat(
                "missing %PDF- header".to_string(),
            ));
        }

        let document = Document::load_mem(bytes).map_err(|e| LoadError::decode(e.to_string()))?;
        let pages = document.get_pages();
        debug!(pages = pages.len(), size = bytes.len(), "PDF decoded");

        Ok(Box::new(PdfDocument { document, pages }))
    }
}

struct PdfDocument {
    document: Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl PdfDocument {
    fn page_id(&self, page_number: u32) -> Result<ObjectId, LoadError> {
        self.pages
            .get(&page_number)
            .copied()
            .ok_or_else(|| LoadError::decode(format!("page {page_number} does not exist")))
    }

    fn resolve<'a>(&'a self, object: &'a Object) -> Result<&'a Object, LoadError> {
        match object {
            Object::Reference(id) => self
                .document
                .get_object(*id)
                .map_err(|e| LoadError::decode(e.to_string())),
            other => Ok(other),
        }
    }

    /// Looks up `MediaBox` on the page, then on its ancestors.
    fn media_box(&self, page_id: ObjectId) -> Result<Option<Vec<f64>>, LoadError> {
        let mut current: &Dictionary = self
            .document
            .get_dictionary(page_id)
            .map_err(|e| LoadError::decode(e.to_string()))?;

        for _ in 0..MAX_INHERITANCE_DEPTH {
            if let Ok(value) = current.get(b"MediaBox") {
                let values = self
                    .resolve(value)?
                    .as_array()
                    .map_err(|e| LoadError::decode(e.to_string()))?
                    .iter()
                    .filter_map(|item| self.resolve(item).ok().and_then(number))
                    .collect::<Vec<_>>();
                return Ok(Some(values));
            }

            let Ok(parent) = current.get(b"Parent") else {
                return Ok(None);
            };
            current = self
                .resolve(parent)?
                .as_dict()
                .map_err(|e| LoadError::decode(e.to_string()))?;
        }

        Ok(None)
    }
}

impl DecodedDocument for PdfDocument {
    fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }

    fn page_size(&self, page_number: u32) -> Result<(f64, f64), LoadError> {
        let page_id = self.page_id(page_number)?;
        match self.media_box(page_id)?.as_deref() {
            Some([x0, y0, x1, y1]) => Ok(((x1 - x0).abs(), (y1 - y0).abs())),
            Some(other) => Err(LoadError::decode(format!(
                "page {page_number} has a malformed media box ({} values)",
                other.len()
            ))),
            None => {
                warn!(page = page_number, "No media box, assuming US Letter");
                Ok(DEFAULT_PAGE_SIZE)
            }
        }
    }

    fn page_text(&self, page_number: u32) -> Result<String, LoadError> {
        self.page_id(page_number)?;
        self.document
            .extract_text(&[page_number])
            .map_err(|e| LoadError::decode(e.to_string()))
    }
}

fn number(object: &Object) -> Option<f64> {
    match object {
        #[allow(clippy::cast_precision_loss)]
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(f64::from(*value)),
        _ => None,
    }
}
