//! Per-page processing pipeline: raster in, indexed rows out.
//!
//! Runs the OCR coordinator over a claimed page, normalizes the text,
//! extracts entities, builds the search row, and commits everything in
//! one transaction. Blocking; callers run it on a blocking thread.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{Entity, ImagePage, OcrText};
use crate::ocr::{assemble_text, OcrCoordinator};
use crate::processing::{normalize, EntityExtractor};
use crate::repository::Repository;
use crate::search::build_record;
use crate::storage::BlobStore;

/// Drives one page through OCR, processing, and indexing.
pub struct PagePipeline {
    repo: Arc<Repository>,
    blobs: Arc<dyn BlobStore>,
    coordinator: OcrCoordinator,
    extractor: EntityExtractor,
}

impl PagePipeline {
    pub fn new(
        repo: Arc<Repository>,
        blobs: Arc<dyn BlobStore>,
        coordinator: OcrCoordinator,
    ) -> Self {
        Self {
            repo,
            blobs,
            coordinator,
            extractor: EntityExtractor::new(),
        }
    }

    /// Process one page end to end. Returns the new OCR text id.
    ///
    /// The page should be claimed (`in_progress`) by the caller; the
    /// final transaction flips it to `done`.
    pub fn process_page(&self, page: &ImagePage) -> Result<String> {
        let bytes = self.blobs.get(&page.image_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("page raster missing: {}", page.image_path))
            } else {
                Error::Internal(e.to_string())
            }
        })?;

        let result = self.coordinator.run(&bytes)?;

        let raw_text = assemble_text(&result.word_boxes);
        let normalized = normalize(&raw_text);

        let mut ocr = OcrText::new(
            page.id.clone(),
            page.document_id.clone(),
            page.page_number,
            raw_text,
            result.word_boxes,
            result.engine,
        );
        ocr.normalized_text = normalized;
        ocr.page_confidence = result.page_confidence;

        let detected = self.extractor.extract(&ocr.normalized_text, &ocr.word_boxes);
        let entities: Vec<Entity> = detected
            .into_iter()
            .map(|d| Entity {
                id: uuid::Uuid::new_v4().to_string(),
                ocr_id: ocr.id.clone(),
                document_id: ocr.document_id.clone(),
                page_number: ocr.page_number,
                kind: d.kind,
                value: d.value,
                normalized_value: d.normalized_value,
                bbox: d.bbox,
                confidence: 1.0,
            })
            .collect();

        let search = build_record(&ocr);

        self.repo.store_page_results(&ocr, &entities, &search)?;

        tracing::info!(
            "OCR completed for {}: {} words, {} entities, confidence {:.2}",
            page.id,
            ocr.word_boxes.len(),
            entities.len(),
            ocr.page_confidence
        );
        Ok(ocr.id)
    }

    pub fn coordinator(&self) -> &OcrCoordinator {
        &self.coordinator
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::DynamicImage;

    use crate::models::WordBox;
    use crate::ocr::{OcrBackend, OcrEngineKind, OcrError, OcrPageResult};

    /// Backend that recognizes a fixed word list on every page.
    pub struct StubBackend {
        pub words: Vec<&'static str>,
    }

    impl OcrBackend for StubBackend {
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
            _image: &DynamicImage,
            _languages: &[String],
        ) -> Result<OcrPageResult, OcrError> {
            let boxes = self
                .words
                .iter()
                .enumerate()
                .map(|(i, w)| WordBox {
                    text: w.to_string(),
                    x: 10.0 + i as f32 * 60.0,
                    y: 20.0,
                    width: 50.0,
                    height: 12.0,
                    confidence: 0.95,
                })
                .collect();
            Ok(OcrPageResult::from_word_boxes(boxes, &self.kind()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubBackend;
    use super::*;
    use crate::config::OcrConfig;
    use crate::models::{Document, EntityKind, FileType, OcrState};
    use crate::storage::FsBlobStore;
    use tempfile::TempDir;

    fn harness(words: Vec<&'static str>) -> (TempDir, Arc<Repository>, PagePipeline, ImagePage) {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(Repository::open(&dir.path().join("db.sqlite")).unwrap());
        let blobs: Arc<dyn BlobStore> =
            Arc::new(FsBlobStore::new(&dir.path().join("blobs")).unwrap());

        let doc = Document::new(
            Document::content_id(b"pipeline fixture"),
            "https://example.com/doc.png".into(),
            "doc.png".into(),
            FileType::Png,
            10,
            serde_json::json!({}),
        );
        repo.save_document(&doc).unwrap();

        let page = ImagePage::new(doc.id.clone(), 1, 400, 300);
        repo.save_page(&page).unwrap();

        // Store a decodable raster for the page.
        let img = image::DynamicImage::new_rgb8(400, 300);
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        blobs.put(&page.image_path, &png).unwrap();

        let config = OcrConfig {
            preprocess: false,
            deskew: false,
            ..OcrConfig::default()
        };
        let coordinator = OcrCoordinator::with_backend(Box::new(StubBackend { words }), config);
        let pipeline = PagePipeline::new(repo.clone(), blobs, coordinator);
        (dir, repo, pipeline, page)
    }

    #[test]
    fn test_process_page_writes_all_rows() {
        let (_dir, repo, pipeline, page) =
            harness(vec!["Contact", "a@b.com", "about", "flight", "log"]);

        let ocr_id = pipeline.process_page(&page).unwrap();

        let stored = repo.get_page(&page.id).unwrap().unwrap();
        assert_eq!(stored.ocr_state, OcrState::Done);

        let ocr = repo.get_ocr_text(&ocr_id).unwrap().unwrap();
        assert_eq!(ocr.raw_text, "Contact a@b.com about flight log");
        assert_eq!(ocr.word_boxes.len(), 5);
        assert!(ocr.page_confidence > 0.9);

        let entities = repo.get_entities_for_ocr(&ocr_id).unwrap();
        assert!(entities
            .iter()
            .any(|e| e.kind == EntityKind::Email
                && e.normalized_value.as_deref() == Some("a@b.com")));

        let record = repo.get_search_record_for_ocr(&ocr_id).unwrap().unwrap();
        assert!(record.tokens.contains(&"flight".to_string()));
    }

    #[test]
    fn test_empty_page_yields_empty_text_and_no_entities() {
        let (_dir, repo, pipeline, page) = harness(Vec::new());

        let ocr_id = pipeline.process_page(&page).unwrap();
        let ocr = repo.get_ocr_text(&ocr_id).unwrap().unwrap();
        assert!(ocr.raw_text.is_empty());
        assert_eq!(ocr.page_confidence, 0.0);
        assert!(repo.get_entities_for_ocr(&ocr_id).unwrap().is_empty());
    }

    #[test]
    fn test_missing_raster_is_not_found() {
        let (_dir, repo, pipeline, page) = harness(Vec::new());
        // Seed a second page without a blob behind it.
        let orphan = ImagePage::new(page.document_id.clone(), 2, 100, 100);
        repo.save_page(&orphan).unwrap();

        let err = pipeline.process_page(&orphan).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_reprocessing_done_page_replaces_rows() {
        let (_dir, repo, pipeline, page) = harness(vec!["flight", "log"]);
        let first = pipeline.process_page(&page).unwrap();
        let second = pipeline.process_page(&page).unwrap();
        assert_ne!(first, second);
        assert_eq!(repo.count_ocr_texts().unwrap(), 1);
        let ocr = repo.get_ocr_text(&second).unwrap().unwrap();
        assert_eq!(ocr.raw_text, "flight log");
    }
}
