//! Service facade over the pipeline: the operations the HTTP layer (out
//! of scope here) and the CLI consume.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::crawlers::{
    default_exclude_rules, CrawlOutcome, DojCrawler, EndpointCrawler, HttpClient,
};
use crate::error::{Error, Result};
use crate::ingest::splitter::PageSplitter;
use crate::ingest::{FetchReport, Fetcher};
use crate::models::{Entity, EntityKind, OcrState};
use crate::ocr::OcrCoordinator;
use crate::pipeline::PagePipeline;
use crate::repository::Repository;
use crate::search::{Embedder, SearchEngine, SearchHit, SearchMode, SearchOptions};
use crate::storage::{BlobStore, FsBlobStore};

/// Which source an ingest run crawls.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    /// Generic JSON listing endpoint at this base URL.
    Endpoint(String),
    /// The configured site-specific crawl root.
    Site(String),
}

impl SourceSpec {
    /// Resolve a CLI/API source id: "site" (or "doj") selects the
    /// site-specific crawler, an http(s) URL selects the generic
    /// endpoint crawler, no id falls back to the configured endpoint.
    pub fn resolve(source_id: Option<&str>, settings: &Settings) -> Result<Self> {
        match source_id {
            Some("site") | Some("doj") => Ok(Self::Site(settings.site_root.clone())),
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                Ok(Self::Endpoint(url.trim_end_matches('/').to_string()))
            }
            Some(other) => Err(Error::InvalidArgument(format!(
                "unknown source: {other} (expected \"site\" or a base URL)"
            ))),
            None => settings
                .source_endpoint
                .clone()
                .map(Self::Endpoint)
                .ok_or_else(|| {
                    Error::InvalidArgument(
                        "no source given and no source_endpoint configured".to_string(),
                    )
                }),
        }
    }
}

/// Options for an ingest run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Stop after this many downloads (0 = unlimited).
    pub limit: usize,
    /// Run OCR on the new pages inline instead of leaving them for the
    /// worker loop.
    pub process_pages: bool,
    pub skip_existing: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            limit: 0,
            process_pages: false,
            skip_existing: true,
        }
    }
}

/// What an ingest run did.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub discovered: usize,
    pub excluded: usize,
    pub downloaded: usize,
    /// Pages OCR-processed inline this run.
    pub processed: usize,
    pub errors: Vec<String>,
}

/// The core service: storage, repository, pipeline, and search engine
/// wired together from settings.
pub struct ScansiftService {
    settings: Settings,
    repo: Arc<Repository>,
    blobs: Arc<dyn BlobStore>,
    client: Arc<HttpClient>,
    pipeline: Arc<PagePipeline>,
    engine: SearchEngine,
}

impl ScansiftService {
    /// Open the service against the configured data directory.
    pub fn open(settings: Settings) -> Result<Self> {
        settings.ensure_directories()?;
        let repo = Arc::new(Repository::open(&settings.database_path())?);
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&settings.blobs_dir)?);
        let client = Arc::new(HttpClient::new(
            Duration::from_secs(settings.http_timeout_seconds),
            Duration::from_millis(settings.crawler.rate_limit_per_host_ms),
        )?);

        let coordinator = OcrCoordinator::new(settings.ocr.clone())
            .map_err(|e| Error::Internal(format!("failed to set up OCR engine: {e}")))?;
        let pipeline = Arc::new(PagePipeline::new(repo.clone(), blobs.clone(), coordinator));
        let engine = SearchEngine::new(repo.clone(), settings.search.clone());

        Ok(Self {
            settings,
            repo,
            blobs,
            client,
            pipeline,
            engine,
        })
    }

    /// Attach an embedder, enabling semantic search.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.engine = SearchEngine::new(self.repo.clone(), self.settings.search.clone())
            .with_embedder(embedder);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn repo(&self) -> Arc<Repository> {
        self.repo.clone()
    }

    pub fn pipeline(&self) -> Arc<PagePipeline> {
        self.pipeline.clone()
    }

    /// Crawl a source without downloading anything.
    pub async fn preview_source(&self, source: &SourceSpec) -> Result<CrawlOutcome> {
        match source {
            SourceSpec::Endpoint(base) => {
                EndpointCrawler::new(&self.client, base).discover().await
            }
            SourceSpec::Site(root) => {
                DojCrawler::new(&self.client, root, default_exclude_rules())
                    .discover()
                    .await
            }
        }
    }

    /// Full ingest run: crawl, fetch non-excluded files, split into
    /// pages, optionally OCR inline.
    pub async fn ingest_from_source(
        &self,
        source: &SourceSpec,
        opts: &IngestOptions,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        let outcome = self.preview_source(source).await?;
        report.discovered = outcome.descriptors.len();
        report.excluded = outcome
            .descriptors
            .iter()
            .filter(|d| d.is_excluded())
            .count();
        report.errors.extend(outcome.errors);

        let mut candidates = outcome.descriptors;
        if opts.limit > 0 {
            let mut kept = 0;
            candidates.retain(|d| {
                if d.is_excluded() {
                    true
                } else {
                    kept += 1;
                    kept <= opts.limit
                }
            });
        }

        let fetcher = Arc::new(Fetcher::new(
            self.repo.clone(),
            self.blobs.clone(),
            self.settings.crawler.clone(),
            opts.skip_existing,
        ));
        let fetch_report: FetchReport = fetcher.fetch_all(self.client.clone(), &candidates).await;
        report.downloaded = fetch_report.downloaded;
        report.errors.extend(fetch_report.errors);

        // Split everything this run touched; splitting is idempotent.
        let splitter = Arc::new(PageSplitter::new(
            self.repo.clone(),
            self.blobs.clone(),
            self.settings.pdf_dpi,
        ));
        for doc_id in &fetch_report.document_ids {
            let Some(doc) = self.repo.get_document(doc_id)? else {
                continue;
            };
            let splitter = splitter.clone();
            let result =
                tokio::task::spawn_blocking(move || splitter.split_document(&doc)).await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => report.errors.push(format!("split {doc_id}: {e}")),
                Err(e) => report.errors.push(format!("split {doc_id} panicked: {e}")),
            }
        }

        if opts.process_pages {
            report.processed = self.process_pending_pages(0).await?;
        }

        Ok(report)
    }

    /// Ingest caller-provided bytes and split them into pages.
    pub async fn enqueue_document(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        source_url: Option<&str>,
        forbid_reuse: bool,
    ) -> Result<String> {
        let fetcher = Fetcher::new(
            self.repo.clone(),
            self.blobs.clone(),
            self.settings.crawler.clone(),
            true,
        );
        let doc_id = fetcher.store_bytes(&bytes, filename, source_url, forbid_reuse)?;

        let Some(doc) = self.repo.get_document(&doc_id)? else {
            return Err(Error::Internal(format!(
                "document {doc_id} vanished after store"
            )));
        };
        let splitter = PageSplitter::new(
            self.repo.clone(),
            self.blobs.clone(),
            self.settings.pdf_dpi,
        );
        tokio::task::spawn_blocking(move || splitter.split_document(&doc))
            .await
            .map_err(|e| Error::Internal(format!("split task panicked: {e}")))??;

        Ok(doc_id)
    }

    /// Claim and process pending pages until none remain (or `limit`).
    /// Returns the number of pages that reached `done`.
    pub async fn process_pending_pages(&self, limit: usize) -> Result<usize> {
        let mut processed = 0usize;
        loop {
            if limit > 0 && processed >= limit {
                break;
            }
            let batch = self
                .repo
                .claim_pending_pages(self.settings.worker.batch_size.max(1))?;
            if batch.is_empty() {
                break;
            }
            for page in batch {
                let pipeline = self.pipeline.clone();
                let page_clone = page.clone();
                let result =
                    tokio::task::spawn_blocking(move || pipeline.process_page(&page_clone))
                        .await
                        .map_err(|e| Error::Internal(format!("OCR task panicked: {e}")))?;
                match result {
                    Ok(_) => processed += 1,
                    Err(e) => {
                        let permanent = !e.is_transient();
                        self.repo.record_page_failure(
                            &page.id,
                            &e.to_string(),
                            crate::worker::MAX_PAGE_ATTEMPTS,
                            permanent,
                        )?;
                        tracing::warn!("page {} failed: {}", page.id, e);
                    }
                }
            }
        }
        Ok(processed)
    }

    /// Multi-modal search over indexed pages.
    pub fn search(
        &self,
        mode: SearchMode,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        self.engine.search(mode, query, opts)
    }

    /// List detected entities with optional filters.
    pub fn list_entities(
        &self,
        kind: Option<EntityKind>,
        document_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Entity>> {
        let limit = limit.unwrap_or(self.settings.search.default_limit).min(1000);
        Ok(self.repo.list_entities(kind, document_id, limit)?)
    }

    /// Blob URL for a page raster.
    pub fn get_page(&self, page_id: &str) -> Result<String> {
        let page = self
            .repo
            .get_page(page_id)?
            .ok_or_else(|| Error::NotFound(format!("page {page_id} not found")))?;
        if !self.blobs.exists(&page.image_path) {
            return Err(Error::NotFound(format!(
                "raster for page {page_id} missing from blob store"
            )));
        }
        Ok(self.blobs.url(&page.image_path))
    }

    /// Counts for the status command.
    pub fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            documents: self.repo.count_documents()?,
            pages_pending: self.repo.count_pages_in_state(OcrState::Pending)?,
            pages_in_progress: self.repo.count_pages_in_state(OcrState::InProgress)?,
            pages_done: self.repo.count_pages_in_state(OcrState::Done)?,
            pages_failed: self.repo.count_pages_in_state(OcrState::Failed)?,
            ocr_texts: self.repo.count_ocr_texts()?,
            search_records: self.repo.count_search_records()?,
        })
    }
}

/// Pipeline state counts.
#[derive(Debug)]
pub struct StatusReport {
    pub documents: u64,
    pub pages_pending: u64,
    pub pages_in_progress: u64,
    pub pages_done: u64,
    pub pages_failed: u64,
    pub ocr_texts: u64,
    pub search_records: u64,
}
