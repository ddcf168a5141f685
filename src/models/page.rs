//! Raster page model and OCR lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OCR lifecycle of a raster page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrState {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl OcrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One raster image derived from a document.
///
/// A single-image file is a one-page document. The id never changes once
/// produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePage {
    /// `{document_id}_page_{NNNN}` with a zero-padded 1-based page number.
    pub id: String,
    pub document_id: String,
    pub page_number: u32,
    /// Opaque blob key of the page raster.
    pub image_path: String,
    pub width: u32,
    pub height: u32,
    pub ocr_state: OcrState,
    /// Processing attempts so far; drives the retry-then-fail policy.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Set while a worker holds the claim; used by the reaper.
    pub claimed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ImagePage {
    /// Derive the stable page identifier.
    pub fn page_id(document_id: &str, page_number: u32) -> String {
        format!("{}_page_{:04}", document_id, page_number)
    }

    /// Blob key under which the page raster is stored.
    pub fn blob_key(page_id: &str) -> String {
        format!("images/{}.png", page_id)
    }

    pub fn new(document_id: String, page_number: u32, width: u32, height: u32) -> Self {
        let id = Self::page_id(&document_id, page_number);
        let image_path = Self::blob_key(&id);
        Self {
            id,
            document_id,
            page_number,
            image_path,
            width,
            height,
            ocr_state: OcrState::Pending,
            attempts: 0,
            last_error: None,
            claimed_at: None,
            updated_at: Utc::now(),
        }
    }
}
