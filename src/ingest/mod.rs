//! Document fetching and ingestion.
//!
//! The fetcher downloads non-excluded descriptors, hashes the bytes into
//! a document id, stores the original under `files/`, and records the
//! Document row. Splitting into page rasters lives in `splitter`.

pub mod splitter;

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::CrawlerConfig;
use crate::crawlers::{FileDescriptor, HttpClient};
use crate::error::{Error, Result};
use crate::models::{Document, FileType};
use crate::repository::Repository;
use crate::storage::BlobStore;

/// Outcome of one fetch run.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Descriptors handed in, excluded ones included.
    pub discovered: usize,
    /// Documents whose bytes were downloaded this run.
    pub downloaded: usize,
    /// Documents skipped (excluded, or already present with
    /// skip_existing set).
    pub skipped: usize,
    pub errors: Vec<String>,
    /// Ids of documents stored or re-seen this run.
    pub document_ids: Vec<String>,
}

/// Downloads candidate files and records Document rows.
pub struct Fetcher {
    repo: Arc<Repository>,
    blobs: Arc<dyn BlobStore>,
    config: CrawlerConfig,
    skip_existing: bool,
}

impl Fetcher {
    pub fn new(
        repo: Arc<Repository>,
        blobs: Arc<dyn BlobStore>,
        config: CrawlerConfig,
        skip_existing: bool,
    ) -> Self {
        Self {
            repo,
            blobs,
            config,
            skip_existing,
        }
    }

    /// Fetch every non-excluded descriptor, bounded by the configured
    /// download concurrency. Failures are collected, not fatal.
    pub async fn fetch_all(
        self: &Arc<Self>,
        client: Arc<HttpClient>,
        descriptors: &[FileDescriptor],
    ) -> FetchReport {
        let mut report = FetchReport {
            discovered: descriptors.len(),
            ..Default::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_downloads.max(1)));
        let mut handles = Vec::new();

        for descriptor in descriptors {
            if descriptor.is_excluded() {
                report.skipped += 1;
                continue;
            }
            let permit_source = semaphore.clone();
            let fetcher = self.clone();
            let client = client.clone();
            let descriptor = descriptor.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit_source
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Cancelled("download pool closed".to_string()))?;
                fetcher.fetch_one(&client, &descriptor).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(FetchOutcome::Stored(id))) => {
                    report.downloaded += 1;
                    report.document_ids.push(id);
                }
                Ok(Ok(FetchOutcome::AlreadyPresent(id))) => {
                    report.skipped += 1;
                    report.document_ids.push(id);
                }
                Ok(Err(e)) => report.errors.push(e.to_string()),
                Err(e) => report.errors.push(format!("fetch task panicked: {e}")),
            }
        }

        report
    }

    /// Download one descriptor and store it.
    async fn fetch_one(
        &self,
        client: &HttpClient,
        descriptor: &FileDescriptor,
    ) -> Result<FetchOutcome> {
        let file_type = FileType::from_filename(&descriptor.filename).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "unsupported file extension: {}",
                descriptor.filename
            ))
        })?;

        let bytes = client.get_bytes(&descriptor.url).await?;
        if bytes.is_empty() {
            return Err(Error::PermanentUpstream(format!(
                "{} returned an empty body",
                descriptor.url
            )));
        }

        let id = Document::content_id(&bytes);
        if self.repo.document_exists(&id)? && self.skip_existing {
            tracing::debug!("document {} already ingested, skipping", id);
            return Ok(FetchOutcome::AlreadyPresent(id));
        }

        let metadata = serde_json::json!({
            "section": descriptor.section_label,
            "content_type_hint": descriptor.content_type_hint,
        });

        let doc = Document::new(
            id.clone(),
            descriptor.url.clone(),
            descriptor.filename.clone(),
            file_type,
            bytes.len() as u64,
            metadata,
        );

        self.blobs.put(&doc.blob_key(), &bytes)?;
        self.repo.save_document(&doc)?;

        tracing::info!(
            "stored document {} ({}, {} bytes)",
            doc.id,
            doc.file_name,
            doc.file_size
        );
        Ok(FetchOutcome::Stored(id))
    }

    /// Ingest caller-provided bytes (the enqueue path). With
    /// `forbid_reuse`, an existing document under the same hash is a
    /// conflict.
    pub fn store_bytes(
        &self,
        bytes: &[u8],
        filename: &str,
        source_url: Option<&str>,
        forbid_reuse: bool,
    ) -> Result<String> {
        let file_type = FileType::from_filename(filename).ok_or_else(|| {
            Error::InvalidArgument(format!("unsupported file extension: {filename}"))
        })?;
        if bytes.is_empty() {
            return Err(Error::InvalidArgument("empty file body".to_string()));
        }

        let id = Document::content_id(bytes);
        if self.repo.document_exists(&id)? {
            if forbid_reuse {
                return Err(Error::Conflict(format!(
                    "document {id} already exists for these bytes"
                )));
            }
            return Ok(id);
        }

        let doc = Document::new(
            id.clone(),
            source_url.unwrap_or("").to_string(),
            filename.to_string(),
            file_type,
            bytes.len() as u64,
            serde_json::json!({}),
        );
        self.blobs.put(&doc.blob_key(), bytes)?;
        self.repo.save_document(&doc)?;
        Ok(id)
    }
}

enum FetchOutcome {
    Stored(String),
    AlreadyPresent(String),
}
