//! Background worker loops.
//!
//! Two loops share the database with any number of sibling processes:
//! the pending-pages loop claims and OCRs pages, and the site-ingest
//! loop periodically re-crawls the configured site. Claims are
//! row-level; a TTL reaper recovers pages from crashed workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::Settings;
use crate::error::Result;
use crate::models::ImagePage;
use crate::pipeline::PagePipeline;
use crate::repository::Repository;
use crate::service::{IngestOptions, ScansiftService, SourceSpec};

/// Attempts before a transiently-failing page is parked in `failed`.
pub const MAX_PAGE_ATTEMPTS: u32 = 5;

/// Name of the site loop's state row.
const SITE_LOOP_NAME: &str = "site_ingest";

/// How often the site loop wakes to check for shutdown and due runs.
const SITE_POLL: Duration = Duration::from_secs(1);

/// Worker that drains pending pages through the OCR pipeline.
pub struct PendingPagesWorker {
    repo: Arc<Repository>,
    pipeline: Arc<PagePipeline>,
    batch_size: u32,
    poll: Duration,
    claim_ttl_seconds: u64,
    ocr_timeout: Duration,
}

impl PendingPagesWorker {
    pub fn new(repo: Arc<Repository>, pipeline: Arc<PagePipeline>, settings: &Settings) -> Self {
        Self {
            repo,
            pipeline,
            batch_size: settings.worker.batch_size.max(1),
            poll: Duration::from_secs(settings.worker.poll_seconds.max(1)),
            claim_ttl_seconds: settings.worker.claim_ttl_seconds,
            ocr_timeout: Duration::from_secs(settings.ocr_timeout_seconds),
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "pending-pages worker started (batch {}, poll {:?})",
            self.batch_size,
            self.poll
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.tick(&shutdown).await {
                tracing::warn!("pending-pages tick failed: {}", e);
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(self.poll) => {}
            }
        }
        tracing::info!("pending-pages worker stopped");
    }

    /// One poll cycle: reap stale claims, then claim and process a batch.
    async fn tick(&self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let reaped = self.repo.reap_stale_claims(self.claim_ttl_seconds)?;
        if reaped > 0 {
            tracing::info!("reaped {} stale page claims", reaped);
        }

        let batch = self.repo.claim_pending_pages(self.batch_size)?;
        for page in batch {
            if *shutdown.borrow() {
                // Unwind cleanly: hand the claim back.
                self.repo.release_page_claim(&page.id)?;
                continue;
            }
            self.process_one(&page).await?;
        }
        Ok(())
    }

    async fn process_one(&self, page: &ImagePage) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let page_clone = page.clone();
        let work = tokio::task::spawn_blocking(move || pipeline.process_page(&page_clone));

        match tokio::time::timeout(self.ocr_timeout, work).await {
            Ok(Ok(Ok(_))) => Ok(()),
            Ok(Ok(Err(e))) => {
                let permanent = !e.is_transient();
                let state = self.repo.record_page_failure(
                    &page.id,
                    &e.to_string(),
                    MAX_PAGE_ATTEMPTS,
                    permanent,
                )?;
                tracing::warn!("page {} failed ({}): {}", page.id, state.as_str(), e);
                Ok(())
            }
            Ok(Err(join_err)) => {
                self.repo.record_page_failure(
                    &page.id,
                    &format!("OCR task panicked: {join_err}"),
                    MAX_PAGE_ATTEMPTS,
                    false,
                )?;
                Ok(())
            }
            Err(_) => {
                // The blocking task cannot be interrupted; record the
                // timeout and let the claim reaper handle a hung thread.
                self.repo.record_page_failure(
                    &page.id,
                    "OCR deadline exceeded",
                    MAX_PAGE_ATTEMPTS,
                    false,
                )?;
                Ok(())
            }
        }
    }
}

/// Worker that periodically crawls and ingests the configured site.
pub struct SiteIngestWorker {
    service: Arc<ScansiftService>,
    run_interval: Duration,
    skip_existing: bool,
}

impl SiteIngestWorker {
    pub fn new(service: Arc<ScansiftService>) -> Self {
        let settings = service.settings();
        Self {
            run_interval: Duration::from_secs(settings.site_ingest.run_interval_seconds.max(1)),
            skip_existing: settings.site_ingest.skip_existing,
            service,
        }
    }

    /// Run until the shutdown signal flips. Sleeps in short polls so
    /// shutdown interrupts promptly even inside a long interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let repo = self.service.repo();
        if let Err(e) = repo.get_or_create_ingest_state(SITE_LOOP_NAME) {
            tracing::error!("site-ingest worker cannot read its state row: {}", e);
            return;
        }
        tracing::info!(
            "site-ingest worker started (interval {:?})",
            self.run_interval
        );

        let mut last_run: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let _ = repo.touch_ingest_heartbeat(SITE_LOOP_NAME);

            let due = last_run
                .map(|t| t.elapsed() >= self.run_interval)
                .unwrap_or(true);
            if due {
                let _ = repo.mark_ingest_run_started(SITE_LOOP_NAME);
                let error = match self.run_once().await {
                    Ok(report) => {
                        tracing::info!(
                            "site ingest run: {} discovered, {} excluded, {} downloaded, {} errors",
                            report.discovered,
                            report.excluded,
                            report.downloaded,
                            report.errors.len()
                        );
                        None
                    }
                    Err(e) => {
                        tracing::warn!("site ingest run failed: {}", e);
                        Some(e.to_string())
                    }
                };
                let _ = repo.mark_ingest_run_completed(SITE_LOOP_NAME, error.as_deref());
                last_run = Some(Instant::now());
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(SITE_POLL) => {}
            }
        }
        tracing::info!("site-ingest worker stopped");
    }

    /// One crawl + fetch + split pass. New pages are left pending for
    /// the page worker.
    pub async fn run_once(&self) -> Result<crate::service::IngestReport> {
        let source = SourceSpec::Site(self.service.settings().site_root.clone());
        let opts = IngestOptions {
            limit: 0,
            process_pages: false,
            skip_existing: self.skip_existing,
        };
        self.service.ingest_from_source(&source, &opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::temp_repo;
    use crate::models::{Document, FileType, OcrState};

    #[test]
    fn test_rerunning_worker_on_done_page_is_noop() {
        // A done page is never claimed again, so the worker cannot touch it.
        let (_dir, repo) = temp_repo();
        let doc = Document::new(
            Document::content_id(b"worker fixture"),
            "https://example.com/d.png".into(),
            "d.png".into(),
            FileType::Png,
            1,
            serde_json::json!({}),
        );
        repo.save_document(&doc).unwrap();
        let page = ImagePage::new(doc.id.clone(), 1, 10, 10);
        repo.save_page(&page).unwrap();

        // Drive the page to done through the normal claim path.
        let claimed = repo.claim_pending_pages(1).unwrap();
        assert_eq!(claimed.len(), 1);
        let ocr = crate::models::OcrText::new(
            page.id.clone(),
            doc.id.clone(),
            1,
            String::new(),
            Vec::new(),
            "stub".into(),
        );
        let search = crate::search::build_record(&ocr);
        repo.store_page_results(&ocr, &[], &search).unwrap();

        assert_eq!(repo.count_pages_in_state(OcrState::Done).unwrap(), 1);
        assert!(repo.claim_pending_pages(10).unwrap().is_empty());
    }
}
