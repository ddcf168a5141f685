//! OCR backend abstraction.
//!
//! Backends receive a decoded image and return word-level boxes with
//! confidences in the pixel coordinates of that image. The coordinator
//! owns preprocessing and maps boxes back to original page coordinates.

use image::DynamicImage;
use thiserror::Error;

use crate::models::{page_confidence, WordBox};

/// Errors from OCR backends.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("rate limited by {backend}, retry after {retry_after_secs:?}s")]
    RateLimited {
        backend: OcrEngineKind,
        retry_after_secs: Option<u64>,
    },

    #[error("image error: {0}")]
    ImageError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    /// Whether retrying later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OcrError::RateLimited { .. } | OcrError::Io(_) | OcrError::OcrFailed(_)
        )
    }

    /// Short class name recorded on failed pages.
    pub fn class(&self) -> &'static str {
        match self {
            OcrError::BackendNotAvailable(_) => "backend_not_available",
            OcrError::OcrFailed(_) => "ocr_failed",
            OcrError::RateLimited { .. } => "rate_limited",
            OcrError::ImageError(_) => "image_error",
            OcrError::Io(_) => "io",
        }
    }
}

/// Available OCR engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrEngineKind {
    /// Tesseract via command line.
    Tesseract,
    /// Pure-Rust neural OCR (ocrs crate).
    Ocrs,
    /// PaddleOCR via ONNX Runtime.
    Paddle,
    /// Remote vision API (Textract-style).
    Textract,
    /// Word-level merge across every configured engine.
    Ensemble,
}

impl OcrEngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tesseract => "tesseract",
            Self::Ocrs => "ocrs",
            Self::Paddle => "paddle",
            Self::Textract => "textract",
            Self::Ensemble => "ensemble",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tesseract" => Some(Self::Tesseract),
            // The pure-Rust neural engine fills the EasyOCR role.
            "ocrs" | "easyocr" => Some(Self::Ocrs),
            "paddle" | "paddleocr" => Some(Self::Paddle),
            "textract" => Some(Self::Textract),
            "ensemble" => Some(Self::Ensemble),
            _ => None,
        }
    }
}

impl std::fmt::Display for OcrEngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one OCR pass over one image.
#[derive(Debug, Clone, Default)]
pub struct OcrPageResult {
    /// Word boxes in the coordinates of the image the backend was given.
    pub word_boxes: Vec<WordBox>,
    /// Character-length-weighted mean word confidence; 0 for empty pages.
    pub page_confidence: f32,
    /// Identifier of the engine that produced this result.
    pub engine: String,
}

impl OcrPageResult {
    pub fn from_word_boxes(word_boxes: Vec<WordBox>, engine: &OcrEngineKind) -> Self {
        let confidence = page_confidence(&word_boxes);
        Self {
            word_boxes,
            page_confidence: confidence,
            engine: engine.as_str().to_string(),
        }
    }
}

/// Capability interface every OCR engine implements.
pub trait OcrBackend: Send + Sync {
    fn kind(&self) -> OcrEngineKind;

    /// Whether the engine can run (binaries installed, models present,
    /// credentials configured).
    fn is_available(&self) -> bool;

    /// What is missing when `is_available` is false.
    fn availability_hint(&self) -> String;

    /// Recognize words in the given image.
    fn extract(
        &self,
        image: &DynamicImage,
        languages: &[String],
    ) -> Result<OcrPageResult, OcrError>;
}
