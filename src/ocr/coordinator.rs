//! OCR coordinator: drives one backend over page rasters.
//!
//! Owns preprocessing and multi-scale passes, maps boxes back into
//! original page coordinates, and assembles the final per-page result.

use image::DynamicImage;

use super::backend::{OcrBackend, OcrEngineKind, OcrError, OcrPageResult};
use super::ensemble::EnsembleBackend;
use super::preprocess::{preprocess, unrotate_box};
use super::tesseract::TesseractBackend;
use super::textract::TextractBackend;
use crate::config::OcrConfig;
use crate::models::{page_confidence, WordBox};

/// Multi-scale duplicates merge at this overlap.
const SCALE_MERGE_IOU: f32 = 0.6;

/// Build the configured backend.
pub fn create_backend(config: &OcrConfig) -> Result<Box<dyn OcrBackend>, OcrError> {
    let kind = OcrEngineKind::parse(&config.engine).ok_or_else(|| {
        OcrError::BackendNotAvailable(format!("unknown OCR engine: {}", config.engine))
    })?;
    instantiate(kind, config)
}

fn instantiate(kind: OcrEngineKind, config: &OcrConfig) -> Result<Box<dyn OcrBackend>, OcrError> {
    match kind {
        OcrEngineKind::Tesseract => Ok(Box::new(TesseractBackend::new())),
        OcrEngineKind::Textract => Ok(Box::new(TextractBackend::new())),
        #[cfg(feature = "ocr-ocrs")]
        OcrEngineKind::Ocrs => Ok(Box::new(super::ocrs_backend::OcrsBackend::new())),
        #[cfg(not(feature = "ocr-ocrs"))]
        OcrEngineKind::Ocrs => Err(OcrError::BackendNotAvailable(
            "built without the ocr-ocrs feature".to_string(),
        )),
        #[cfg(feature = "ocr-paddle")]
        OcrEngineKind::Paddle => Ok(Box::new(super::paddle::PaddleBackend::new())),
        #[cfg(not(feature = "ocr-paddle"))]
        OcrEngineKind::Paddle => Err(OcrError::BackendNotAvailable(
            "built without the ocr-paddle feature".to_string(),
        )),
        OcrEngineKind::Ensemble => {
            let mut engines: Vec<Box<dyn OcrBackend>> = vec![
                Box::new(TesseractBackend::new()),
                Box::new(TextractBackend::new()),
            ];
            #[cfg(feature = "ocr-ocrs")]
            engines.push(Box::new(super::ocrs_backend::OcrsBackend::new()));
            #[cfg(feature = "ocr-paddle")]
            engines.push(Box::new(super::paddle::PaddleBackend::new()));
            Ok(Box::new(EnsembleBackend::new(
                engines,
                config.drop_confidence,
            )))
        }
    }
}

/// Coordinates preprocessing, scaling, and a single OCR backend.
pub struct OcrCoordinator {
    backend: Box<dyn OcrBackend>,
    config: OcrConfig,
}

impl OcrCoordinator {
    pub fn new(config: OcrConfig) -> Result<Self, OcrError> {
        let backend = create_backend(&config)?;
        Ok(Self { backend, config })
    }

    /// For tests: inject a backend directly.
    pub fn with_backend(backend: Box<dyn OcrBackend>, config: OcrConfig) -> Self {
        Self { backend, config }
    }

    pub fn engine(&self) -> OcrEngineKind {
        self.backend.kind()
    }

    pub fn availability_hint(&self) -> String {
        self.backend.availability_hint()
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    /// Run OCR over encoded image bytes, returning boxes in original page
    /// coordinates.
    pub fn run(&self, image_bytes: &[u8]) -> Result<OcrPageResult, OcrError> {
        let original = image::load_from_memory(image_bytes)
            .map_err(|e| OcrError::ImageError(format!("failed to decode page image: {e}")))?;
        let (orig_w, orig_h) = (original.width(), original.height());

        let (working, rotation_angle) = if self.config.preprocess {
            let pre = preprocess(&original, self.config.deskew);
            (pre.image, pre.rotation_angle)
        } else {
            (original, 0.0)
        };

        let mut scales: Vec<f32> = self
            .config
            .scales
            .iter()
            .copied()
            .filter(|s| *s >= 1.0)
            .collect();
        if scales.is_empty() {
            scales.push(1.0);
        }
        scales.dedup_by(|a, b| (*a - *b).abs() < f32::EPSILON);

        let mut merged: Vec<WordBox> = Vec::new();
        let mut last_err: Option<OcrError> = None;

        for scale in scales {
            let pass_image = scale_image(&working, scale);
            match self.backend.extract(&pass_image, &self.config.languages) {
                Ok(result) => {
                    let mapped = result.word_boxes.into_iter().map(|mut word| {
                        if (scale - 1.0).abs() > f32::EPSILON {
                            word.x /= scale;
                            word.y /= scale;
                            word.width /= scale;
                            word.height /= scale;
                        }
                        unrotate_box(&word, rotation_angle, orig_w, orig_h)
                    });
                    merge_scale_pass(&mut merged, mapped.collect());
                }
                Err(e) => {
                    tracing::debug!("OCR pass at {scale}x failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        if merged.is_empty() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }

        // Boxes must stay inside the page.
        for word in &mut merged {
            word.x = word.x.clamp(0.0, orig_w as f32);
            word.y = word.y.clamp(0.0, orig_h as f32);
            word.width = word.width.min(orig_w as f32 - word.x);
            word.height = word.height.min(orig_h as f32 - word.y);
            word.confidence = word.confidence.clamp(0.0, 1.0);
        }

        let confidence = page_confidence(&merged);
        Ok(OcrPageResult {
            word_boxes: merged,
            page_confidence: confidence,
            engine: self.backend.kind().as_str().to_string(),
        })
    }
}

fn scale_image(image: &DynamicImage, scale: f32) -> DynamicImage {
    if (scale - 1.0).abs() < f32::EPSILON {
        return image.clone();
    }
    let w = ((image.width() as f32 * scale) as u32).max(1);
    let h = ((image.height() as f32 * scale) as u32).max(1);
    image.resize_exact(w, h, image::imageops::FilterType::CatmullRom)
}

/// Merge one scale pass into the accumulated boxes, keeping the
/// higher-confidence word per overlapping bbox.
fn merge_scale_pass(merged: &mut Vec<WordBox>, incoming: Vec<WordBox>) {
    for word in incoming {
        match merged
            .iter_mut()
            .find(|existing| existing.bbox().iou(&word.bbox()) >= SCALE_MERGE_IOU)
        {
            Some(existing) => {
                if word.confidence > existing.confidence {
                    *existing = word;
                }
            }
            None => merged.push(word),
        }
    }
}

/// Assemble raw page text from word boxes in reading order.
pub fn assemble_text(word_boxes: &[WordBox]) -> String {
    word_boxes
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticBackend {
        boxes: Vec<WordBox>,
    }

    impl OcrBackend for StaticBackend {
        fn kind(&self) -> OcrEngineKind {
            OcrEngineKind::Tesseract
        }
        fn is_available(&self) -> bool {
            true
        }
        fn availability_hint(&self) -> String {
            String::new()
        }
        fn extract(
            &self,
            image: &DynamicImage,
            _languages: &[String],
        ) -> Result<OcrPageResult, OcrError> {
            // Scale the canned boxes with the image, like a real engine
            // seeing an upscaled input.
            let factor = image.width() as f32 / 100.0;
            let boxes = self
                .boxes
                .iter()
                .map(|b| WordBox {
                    text: b.text.clone(),
                    x: b.x * factor,
                    y: b.y * factor,
                    width: b.width * factor,
                    height: b.height * factor,
                    confidence: b.confidence,
                })
                .collect();
            Ok(OcrPageResult::from_word_boxes(boxes, &self.kind()))
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    fn no_preprocess_config(scales: Vec<f32>) -> OcrConfig {
        OcrConfig {
            preprocess: false,
            deskew: false,
            scales,
            ..OcrConfig::default()
        }
    }

    #[test]
    fn test_multi_scale_boxes_map_back_to_original() {
        let backend = StaticBackend {
            boxes: vec![WordBox {
                text: "word".into(),
                x: 10.0,
                y: 10.0,
                width: 30.0,
                height: 10.0,
                confidence: 0.8,
            }],
        };
        let coordinator = OcrCoordinator::with_backend(
            Box::new(backend),
            no_preprocess_config(vec![1.0, 2.0]),
        );

        let result = coordinator.run(&png_bytes(100, 100)).unwrap();
        // The 1x and 2x passes see the same word; after inverse mapping
        // they overlap and merge into one box at original coordinates.
        assert_eq!(result.word_boxes.len(), 1);
        let b = &result.word_boxes[0];
        assert!((b.x - 10.0).abs() < 1.5);
        assert!((b.width - 30.0).abs() < 1.5);
    }

    #[test]
    fn test_empty_page_yields_zero_confidence() {
        let backend = StaticBackend { boxes: Vec::new() };
        let coordinator =
            OcrCoordinator::with_backend(Box::new(backend), no_preprocess_config(vec![1.0]));
        let result = coordinator.run(&png_bytes(50, 50)).unwrap();
        assert!(result.word_boxes.is_empty());
        assert_eq!(result.page_confidence, 0.0);
    }

    #[test]
    fn test_corrupt_image_is_an_error() {
        let backend = StaticBackend { boxes: Vec::new() };
        let coordinator =
            OcrCoordinator::with_backend(Box::new(backend), no_preprocess_config(vec![1.0]));
        let err = coordinator.run(b"not a png").unwrap_err();
        assert!(matches!(err, OcrError::ImageError(_)));
    }

    #[test]
    fn test_boxes_clamped_to_page() {
        let backend = StaticBackend {
            boxes: vec![WordBox {
                text: "edge".into(),
                x: 90.0,
                y: 90.0,
                width: 30.0,
                height: 30.0,
                confidence: 0.9,
            }],
        };
        let coordinator =
            OcrCoordinator::with_backend(Box::new(backend), no_preprocess_config(vec![1.0]));
        let result = coordinator.run(&png_bytes(100, 100)).unwrap();
        let b = &result.word_boxes[0];
        assert!(b.x + b.width <= 100.0);
        assert!(b.y + b.height <= 100.0);
    }

    #[test]
    fn test_assemble_text_preserves_order() {
        let boxes = vec![
            WordBox {
                text: "flight".into(),
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 5.0,
                confidence: 1.0,
            },
            WordBox {
                text: "log".into(),
                x: 20.0,
                y: 0.0,
                width: 10.0,
                height: 5.0,
                confidence: 1.0,
            },
        ];
        assert_eq!(assemble_text(&boxes), "flight log");
    }
}
