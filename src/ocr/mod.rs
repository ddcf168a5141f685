//! OCR engines and the coordinator that drives them.
//!
//! Engines:
//! - Tesseract via command line with TSV output (default)
//! - ocrs, pure-Rust neural OCR (feature: ocr-ocrs)
//! - PaddleOCR via ONNX Runtime (feature: ocr-paddle)
//! - A remote vision API (Textract-style), env-configured
//! - An ensemble that merges word boxes across engines
//!
//! The coordinator owns preprocessing (CLAHE, denoise, deskew) and
//! multi-scale passes, and maps all boxes back to original page
//! coordinates.

mod backend;
mod coordinator;
mod ensemble;
mod preprocess;
mod tesseract;
mod textract;

#[cfg(feature = "ocr-ocrs")]
mod ocrs_backend;
#[cfg(feature = "ocr-paddle")]
mod paddle;

pub use backend::{OcrBackend, OcrEngineKind, OcrError, OcrPageResult};
pub use coordinator::{assemble_text, create_backend, OcrCoordinator};
pub use ensemble::EnsembleBackend;
pub use tesseract::TesseractBackend;
pub use textract::TextractBackend;

#[cfg(feature = "ocr-ocrs")]
pub use ocrs_backend::OcrsBackend;
#[cfg(feature = "ocr-paddle")]
pub use paddle::PaddleBackend;
