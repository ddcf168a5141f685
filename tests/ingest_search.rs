//! End-to-end pipeline tests: store a document, split it, OCR it with a
//! stub engine, and search the results.

use std::sync::Arc;

use image::DynamicImage;
use tempfile::TempDir;

use scansift::config::{CrawlerConfig, OcrConfig, SearchConfig};
use scansift::ingest::splitter::PageSplitter;
use scansift::ingest::Fetcher;
use scansift::models::{EntityKind, OcrState, WordBox};
use scansift::ocr::{OcrBackend, OcrCoordinator, OcrEngineKind, OcrError, OcrPageResult};
use scansift::pipeline::PagePipeline;
use scansift::repository::Repository;
use scansift::search::{Embedder, SearchEngine, SearchMode, SearchOptions};
use scansift::storage::{BlobStore, FsBlobStore};

/// OCR engine that reads a fixed script: page text keyed by call order.
struct ScriptedBackend {
    words: Vec<&'static str>,
}

impl OcrBackend for ScriptedBackend {
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
                x: 10.0 + i as f32 * 70.0,
                y: 40.0,
                width: 60.0,
                height: 14.0,
                confidence: 0.92,
            })
            .collect();
        Ok(OcrPageResult::from_word_boxes(boxes, &self.kind()))
    }
}

struct Harness {
    _dir: TempDir,
    repo: Arc<Repository>,
    blobs: Arc<dyn BlobStore>,
    fetcher: Fetcher,
    splitter: PageSplitter,
    engine: SearchEngine,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(Repository::open(&dir.path().join("scansift.db")).unwrap());
        let blobs: Arc<dyn BlobStore> =
            Arc::new(FsBlobStore::new(&dir.path().join("blobs")).unwrap());
        let fetcher = Fetcher::new(repo.clone(), blobs.clone(), CrawlerConfig::default(), true);
        let splitter = PageSplitter::new(repo.clone(), blobs.clone(), 200);
        let engine = SearchEngine::new(repo.clone(), SearchConfig::default());
        Self {
            _dir: dir,
            repo,
            blobs,
            fetcher,
            splitter,
            engine,
        }
    }

    fn pipeline_with(&self, words: Vec<&'static str>) -> PagePipeline {
        let config = OcrConfig {
            preprocess: false,
            deskew: false,
            ..OcrConfig::default()
        };
        let coordinator =
            OcrCoordinator::with_backend(Box::new(ScriptedBackend { words }), config);
        PagePipeline::new(self.repo.clone(), self.blobs.clone(), coordinator)
    }

    /// Ingest one synthetic image document and OCR it with the given
    /// scripted words. Returns the document id.
    fn ingest_page(&self, fixture_name: &str, words: Vec<&'static str>) -> String {
        let seed = fixture_name
            .bytes()
            .fold(0u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
        let png = png_bytes(640, 480, seed);
        let doc_id = self
            .fetcher
            .store_bytes(
                &png,
                &format!("{fixture_name}.png"),
                Some(&format!("https://example.com/{fixture_name}.png")),
                false,
            )
            .unwrap();
        let doc = self.repo.get_document(&doc_id).unwrap().unwrap();
        self.splitter.split_document(&doc).unwrap();

        let pipeline = self.pipeline_with(words);
        for page in self.repo.get_pages_for_document(&doc_id).unwrap() {
            let claimed = self.repo.claim_pending_pages(10).unwrap();
            assert!(claimed.iter().any(|p| p.id == page.id));
            pipeline.process_page(&page).unwrap();
        }
        doc_id
    }
}

/// A PNG whose bytes vary with `seed` so content hashes differ.
fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([seed, seed, 255]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

#[test]
fn ingest_produces_consistent_rows() {
    let h = Harness::new();
    let doc_id = h.ingest_page("doc1", vec!["the", "flight", "log", "showing", "names"]);

    let doc = h.repo.get_document(&doc_id).unwrap().unwrap();
    assert_eq!(doc.page_count, 1);
    assert_eq!(h.repo.count_pages_for_document(&doc_id).unwrap(), 1);
    assert_eq!(h.repo.count_pages_in_state(OcrState::Done).unwrap(), 1);
    assert_eq!(h.repo.count_ocr_texts().unwrap(), 1);
    assert_eq!(h.repo.count_search_records().unwrap(), 1);
}

#[test]
fn reingesting_identical_bytes_is_idempotent() {
    let h = Harness::new();
    let png = png_bytes(100, 100, 7);
    let first = h.fetcher.store_bytes(&png, "a.png", None, false).unwrap();
    let second = h.fetcher.store_bytes(&png, "a.png", None, false).unwrap();
    assert_eq!(first, second);
    assert_eq!(h.repo.count_documents().unwrap(), 1);

    let doc = h.repo.get_document(&first).unwrap().unwrap();
    h.splitter.split_document(&doc).unwrap();
    h.splitter.split_document(&doc).unwrap();
    assert_eq!(h.repo.count_pages_for_document(&first).unwrap(), 1);
}

#[test]
fn keyword_search_finds_page_with_snippet_and_boxes() {
    let h = Harness::new();
    h.ingest_page("doc1", vec!["the", "flight", "log", "showing", "departures"]);
    h.ingest_page("doc2", vec!["unrelated", "content", "entirely"]);

    let hits = h
        .engine
        .search(SearchMode::Keyword, "flight log", &SearchOptions::default())
        .unwrap();
    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(hit.page_number, 1);
    assert!(hit.snippet.contains("flight log"));
    assert!(!hit.word_boxes.is_empty());
    assert!(hit.bbox.width > 0.0);
    assert!(!hit.image_path.is_empty());
}

#[test]
fn phrase_search_requires_contiguous_tokens() {
    let h = Harness::new();
    h.ingest_page("doc1", vec!["flight", "recorded", "in", "the", "log"]);

    let phrase_hits = h
        .engine
        .search(SearchMode::Phrase, "flight log", &SearchOptions::default())
        .unwrap();
    assert!(phrase_hits.is_empty());

    let keyword_hits = h
        .engine
        .search(SearchMode::Keyword, "flight log", &SearchOptions::default())
        .unwrap();
    assert_eq!(keyword_hits.len(), 1);
}

#[test]
fn phrase_longer_than_page_never_matches() {
    let h = Harness::new();
    h.ingest_page("doc1", vec!["two", "words"]);
    let hits = h
        .engine
        .search(
            SearchMode::Phrase,
            "two words plus more",
            &SearchOptions::default(),
        )
        .unwrap();
    assert!(hits.is_empty());
}

#[test]
fn fuzzy_search_tolerates_ocr_typos() {
    let h = Harness::new();
    h.ingest_page("doc1", vec!["example", "text", "goes", "here"]);

    let hits = h
        .engine
        .search(SearchMode::Fuzzy, "exampl text", &SearchOptions::default())
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].score >= 0.6);
}

#[test]
fn entity_search_by_normalized_email() {
    let h = Harness::new();
    h.ingest_page("doc1", vec!["Contact", "A@B.COM", "for", "details"]);

    let opts = SearchOptions {
        entity_kind: Some(EntityKind::Email),
        ..SearchOptions::default()
    };
    let hits = h
        .engine
        .search(SearchMode::Entity, "a@b.com", &opts)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].page_number, 1);

    // The stored entity normalized to lowercase.
    let entities = h
        .repo
        .find_entities(EntityKind::Email, "a@b.com", 10)
        .unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].value, "A@B.COM");
}

#[test]
fn empty_page_is_never_a_hit() {
    let h = Harness::new();
    h.ingest_page("blank", Vec::new());

    for (mode, query) in [
        (SearchMode::Keyword, "anything"),
        (SearchMode::Fuzzy, "anything"),
        (SearchMode::Phrase, "anything"),
    ] {
        let hits = h.engine.search(mode, query, &SearchOptions::default()).unwrap();
        assert!(hits.is_empty(), "mode {mode:?} returned the empty page");
    }
}

#[test]
fn query_edge_cases() {
    let h = Harness::new();
    h.ingest_page("doc1", vec!["some", "words"]);

    // Empty query is invalid.
    let err = h
        .engine
        .search(SearchMode::Keyword, "  ", &SearchOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");

    // limit = 0 is an empty Ok.
    let opts = SearchOptions {
        limit: Some(0),
        ..SearchOptions::default()
    };
    let hits = h.engine.search(SearchMode::Keyword, "some", &opts).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn semantic_search_gated_on_embedder() {
    let h = Harness::new();
    h.ingest_page("doc1", vec!["semantic", "content"]);

    let err = h
        .engine
        .search(SearchMode::Semantic, "content", &SearchOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), "capability_disabled");
}

/// Embedder that hashes character counts; enough to exercise the path.
struct CountEmbedder;

impl Embedder for CountEmbedder {
    fn embed(&self, text: &str) -> scansift::Result<Vec<f32>> {
        let mut v = vec![0.0f32; 26];
        for c in text.to_lowercase().chars() {
            if c.is_ascii_lowercase() {
                v[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        Ok(v)
    }
    fn model_id(&self) -> &str {
        "char-count-test"
    }
}

#[test]
fn semantic_search_with_embedder_returns_ranked_hits() {
    let h = Harness::new();
    h.ingest_page("doc1", vec!["alpha", "beta"]);

    let engine = SearchEngine::new(h.repo.clone(), SearchConfig::default())
        .with_embedder(Arc::new(CountEmbedder));
    let hits = engine
        .search(SearchMode::Semantic, "alpha beta", &SearchOptions::default())
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].score > 0.5);
}

#[test]
fn concurrent_workers_claim_each_page_once() {
    let h = Harness::new();

    // Ten pending pages across ten documents.
    for i in 0..10u8 {
        let png = png_bytes(64, 64, i);
        let id = h
            .fetcher
            .store_bytes(&png, &format!("p{i}.png"), None, false)
            .unwrap();
        let doc = h.repo.get_document(&id).unwrap().unwrap();
        h.splitter.split_document(&doc).unwrap();
    }
    assert_eq!(h.repo.count_pages_in_state(OcrState::Pending).unwrap(), 10);

    let db_path = h.repo.database_path().to_path_buf();
    let mut handles = Vec::new();
    for _ in 0..2 {
        let path = db_path.clone();
        handles.push(std::thread::spawn(move || {
            let repo = Repository::open(&path).unwrap();
            let mut claimed = Vec::new();
            loop {
                let batch = repo.claim_pending_pages(2).unwrap();
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|p| p.id));
            }
            claimed
        }));
    }

    let mut all: Vec<String> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    all.sort();
    let before = all.len();
    all.dedup();
    // Every page claimed exactly once, across both workers.
    assert_eq!(before, all.len());
    assert_eq!(all.len(), 10);
    assert_eq!(
        h.repo.count_pages_in_state(OcrState::InProgress).unwrap(),
        10
    );
}

#[test]
fn reprocessing_reproduces_equivalent_rows() {
    let h = Harness::new();
    let doc_id = h.ingest_page("doc1", vec!["flight", "log"]);
    let pages = h.repo.get_pages_for_document(&doc_id).unwrap();
    let first = h.repo.get_ocr_text_for_page(&pages[0].id).unwrap().unwrap();

    // Delete the OCR text; entities and search row cascade.
    h.repo.delete_ocr_text(&first.id).unwrap();
    assert_eq!(h.repo.count_search_records().unwrap(), 0);

    // Re-run OCR; the replacement rows carry the same text.
    let pipeline = h.pipeline_with(vec!["flight", "log"]);
    pipeline.process_page(&pages[0]).unwrap();
    let second = h.repo.get_ocr_text_for_page(&pages[0].id).unwrap().unwrap();
    assert_eq!(second.raw_text, first.raw_text);
    assert_eq!(second.normalized_text, first.normalized_text);
    assert_eq!(h.repo.count_search_records().unwrap(), 1);
}
