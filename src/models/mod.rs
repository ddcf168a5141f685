//! Data model for documents, pages, OCR output, entities, and the
//! search index.

mod document;
mod entity;
mod ocr;
mod page;

pub use document::{Document, FileType};
pub use entity::{Entity, EntityKind};
pub use ocr::{page_confidence, BoundingBox, OcrText, WordBox};
pub use page::{ImagePage, OcrState};

use serde::{Deserialize, Serialize};

/// Full-text search row for one OCR text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: String,
    pub ocr_id: String,
    pub document_id: String,
    /// Lowercased text with punctuation collapsed to spaces.
    pub searchable_text: String,
    /// Tokens in page order, duplicates retained.
    pub tokens: Vec<String>,
}
