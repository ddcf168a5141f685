//! PaddleOCR backend via ONNX Runtime (paddle-ocr-rs).

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use image::DynamicImage;
use paddle_ocr_rs::ocr_lite::OcrLite;
use tempfile::TempDir;

use super::backend::{OcrBackend, OcrEngineKind, OcrError, OcrPageResult};
use crate::models::WordBox;

/// Cached engine; detect methods need &mut self, hence the Mutex.
static OCR_ENGINE: OnceLock<Mutex<OcrLite>> = OnceLock::new();

const DET_MODEL: &str = "ch_PP-OCRv4_det_infer.onnx";
const CLS_MODEL: &str = "ch_ppocr_mobile_v2.0_cls_infer.onnx";
const REC_MODEL: &str = "ch_PP-OCRv4_rec_infer.onnx";

/// PaddleOCR backend.
pub struct PaddleBackend {
    model_dir: PathBuf,
}

impl PaddleBackend {
    pub fn new() -> Self {
        let model_dir = std::env::var("SCANSIFT_PADDLE_MODELS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("scansift")
                    .join("paddle-ocr")
            });
        Self { model_dir }
    }

    fn models_present(&self) -> bool {
        self.model_dir.join(DET_MODEL).exists() && self.model_dir.join(REC_MODEL).exists()
    }

    fn get_or_init_engine(&self) -> Result<&'static Mutex<OcrLite>, OcrError> {
        if let Some(engine) = OCR_ENGINE.get() {
            return Ok(engine);
        }

        let mut ocr = OcrLite::new();
        ocr.init_models(
            &self.model_dir.join(DET_MODEL).to_string_lossy(),
            &self.model_dir.join(CLS_MODEL).to_string_lossy(),
            &self.model_dir.join(REC_MODEL).to_string_lossy(),
            4,
        )
        .map_err(|e| OcrError::OcrFailed(format!("Failed to init PaddleOCR: {e}")))?;

        let _ = OCR_ENGINE.set(Mutex::new(ocr));
        OCR_ENGINE
            .get()
            .ok_or_else(|| OcrError::OcrFailed("Failed to cache OCR engine".to_string()))
    }
}

impl Default for PaddleBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrBackend for PaddleBackend {
    fn kind(&self) -> OcrEngineKind {
        OcrEngineKind::Paddle
    }

    fn is_available(&self) -> bool {
        self.models_present()
    }

    fn availability_hint(&self) -> String {
        if self.models_present() {
            format!("PaddleOCR models found at {:?}", self.model_dir)
        } else {
            format!(
                "PaddleOCR models missing; place {DET_MODEL} and {REC_MODEL} in {:?} \
                 or set SCANSIFT_PADDLE_MODELS",
                self.model_dir
            )
        }
    }

    fn extract(
        &self,
        image: &DynamicImage,
        _languages: &[String],
    ) -> Result<OcrPageResult, OcrError> {
        let engine_mutex = self.get_or_init_engine()?;

        let temp_dir = TempDir::new()?;
        let image_path = temp_dir.path().join("page.png");
        image
            .save(&image_path)
            .map_err(|e| OcrError::ImageError(e.to_string()))?;

        let mut ocr = engine_mutex
            .lock()
            .map_err(|e| OcrError::OcrFailed(format!("Failed to lock OCR engine: {e}")))?;

        let result = ocr
            .detect_from_path(
                image_path.to_str().unwrap_or(""),
                50,    // padding
                1024,  // max side length
                0.5,   // box score threshold
                0.3,   // box threshold
                1.6,   // unclip ratio
                false, // do angle
                false, // most angle
            )
            .map_err(|e| OcrError::OcrFailed(format!("PaddleOCR detection failed: {e}")))?;

        let mut word_boxes = Vec::new();
        for block in &result.text_blocks {
            let text = block.text.trim();
            if text.is_empty() {
                continue;
            }
            let xs: Vec<f32> = block.box_points.iter().map(|p| p.x as f32).collect();
            let ys: Vec<f32> = block.box_points.iter().map(|p| p.y as f32).collect();
            let (Some(min_x), Some(min_y)) = (
                xs.iter().cloned().reduce(f32::min),
                ys.iter().cloned().reduce(f32::min),
            ) else {
                continue;
            };
            let max_x = xs.iter().cloned().fold(min_x, f32::max);
            let max_y = ys.iter().cloned().fold(min_y, f32::max);

            word_boxes.push(WordBox {
                text: text.to_string(),
                x: min_x,
                y: min_y,
                width: max_x - min_x,
                height: max_y - min_y,
                confidence: block.text_score.clamp(0.0, 1.0),
            });
        }

        Ok(OcrPageResult::from_word_boxes(
            word_boxes,
            &OcrEngineKind::Paddle,
        ))
    }
}
