//! Pure-Rust neural OCR backend (ocrs crate).
//!
//! No external binaries; models are loaded from a local directory. Fills
//! the neural-engine role for deployments without tesseract.

use std::path::PathBuf;
use std::sync::OnceLock;

use image::DynamicImage;

use super::backend::{OcrBackend, OcrEngineKind, OcrError, OcrPageResult};
use crate::models::WordBox;

/// Cached engine instance; ocrs::OcrEngine methods take &self.
static OCR_ENGINE: OnceLock<ocrs::OcrEngine> = OnceLock::new();

const DETECTION_MODEL: &str = "text-detection.rten";
const RECOGNITION_MODEL: &str = "text-recognition.rten";

/// Pure-Rust OCR backend.
pub struct OcrsBackend {
    model_dir: PathBuf,
}

impl OcrsBackend {
    pub fn new() -> Self {
        let model_dir = std::env::var("SCANSIFT_OCRS_MODELS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("scansift")
                    .join("ocrs")
            });
        Self { model_dir }
    }

    fn models_present(&self) -> bool {
        self.model_dir.join(DETECTION_MODEL).exists()
            && self.model_dir.join(RECOGNITION_MODEL).exists()
    }

    fn get_or_init_engine(&self) -> Result<&'static ocrs::OcrEngine, OcrError> {
        if let Some(engine) = OCR_ENGINE.get() {
            return Ok(engine);
        }

        let detection_model = rten::Model::load_file(self.model_dir.join(DETECTION_MODEL))
            .map_err(|e| OcrError::OcrFailed(format!("Failed to load detection model: {e}")))?;
        let recognition_model = rten::Model::load_file(self.model_dir.join(RECOGNITION_MODEL))
            .map_err(|e| OcrError::OcrFailed(format!("Failed to load recognition model: {e}")))?;

        let engine = ocrs::OcrEngine::new(ocrs::OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|e| OcrError::OcrFailed(format!("Failed to create OCR engine: {e}")))?;

        // If another thread initialized first, use the winner.
        let _ = OCR_ENGINE.set(engine);
        OCR_ENGINE
            .get()
            .ok_or_else(|| OcrError::OcrFailed("Failed to cache OCR engine".to_string()))
    }
}

impl Default for OcrsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrBackend for OcrsBackend {
    fn kind(&self) -> OcrEngineKind {
        OcrEngineKind::Ocrs
    }

    fn is_available(&self) -> bool {
        self.models_present()
    }

    fn availability_hint(&self) -> String {
        if self.models_present() {
            format!("ocrs models found at {:?}", self.model_dir)
        } else {
            format!(
                "ocrs models missing; place {DETECTION_MODEL} and {RECOGNITION_MODEL} in {:?} \
                 or set SCANSIFT_OCRS_MODELS",
                self.model_dir
            )
        }
    }

    fn extract(
        &self,
        image: &DynamicImage,
        _languages: &[String],
    ) -> Result<OcrPageResult, OcrError> {
        let engine = self.get_or_init_engine()?;

        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let source = ocrs::ImageSource::from_bytes(rgb.as_raw(), (width, height))
            .map_err(|e| OcrError::ImageError(format!("Failed to convert image: {e}")))?;

        let input = engine
            .prepare_input(source)
            .map_err(|e| OcrError::OcrFailed(format!("Failed to prepare input: {e}")))?;

        let word_rects = engine
            .detect_words(&input)
            .map_err(|e| OcrError::OcrFailed(format!("Word detection failed: {e}")))?;
        let lines = engine.find_text_lines(&input, &word_rects);
        let line_texts = engine
            .recognize_text(&input, &lines)
            .map_err(|e| OcrError::OcrFailed(format!("Recognition failed: {e}")))?;

        let mut word_boxes = Vec::new();
        for line in line_texts.iter().flatten() {
            for word in line.words() {
                let rect = word.rotated_rect().bounding_rect();
                let text: String = word.chars().map(|c| c.char).collect();
                if text.trim().is_empty() {
                    continue;
                }
                word_boxes.push(WordBox {
                    text: text.trim().to_string(),
                    x: rect.left() as f32,
                    y: rect.top() as f32,
                    width: rect.width() as f32,
                    height: rect.height() as f32,
                    // ocrs does not expose per-word confidence; treat
                    // recognized words as high confidence.
                    confidence: 0.9,
                });
            }
        }

        Ok(OcrPageResult::from_word_boxes(
            word_boxes,
            &OcrEngineKind::Ocrs,
        ))
    }
}
