//! Image page rows, worker claims, and the claim reaper.

use chrono::{Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, parse_datetime_opt, with_retry, Repository, Result};
use crate::models::{ImagePage, OcrState};

impl Repository {
    /// Insert a page row; an existing row for the same page is left alone.
    pub fn save_page(&self, page: &ImagePage) -> Result<()> {
        with_retry(|| {
            let conn = self.connect()?;
            conn.execute(
                r#"INSERT OR IGNORE INTO image_pages
                   (id, document_id, page_number, image_path, width, height,
                    ocr_state, attempts, last_error, claimed_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
                params![
                    page.id,
                    page.document_id,
                    page.page_number as i64,
                    page.image_path,
                    page.width as i64,
                    page.height as i64,
                    page.ocr_state.as_str(),
                    page.attempts as i64,
                    page.last_error,
                    page.claimed_at.map(|t| t.to_rfc3339()),
                    page.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch a page by id.
    pub fn get_page(&self, page_id: &str) -> Result<Option<ImagePage>> {
        let conn = self.connect()?;
        let page = conn
            .query_row(
                "SELECT * FROM image_pages WHERE id = ?",
                params![page_id],
                row_to_page,
            )
            .optional()?;
        Ok(page)
    }

    /// All pages of a document, in page order.
    pub fn get_pages_for_document(&self, document_id: &str) -> Result<Vec<ImagePage>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT * FROM image_pages WHERE document_id = ? ORDER BY page_number")?;
        let pages = stmt
            .query_map(params![document_id], row_to_page)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    /// Count pages of a document.
    pub fn count_pages_for_document(&self, document_id: &str) -> Result<u32> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM image_pages WHERE document_id = ?",
            params![document_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Count pages in a given state.
    pub fn count_pages_in_state(&self, state: OcrState) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM image_pages WHERE ocr_state = ?",
            params![state.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Atomically claim up to `limit` pending pages for processing.
    ///
    /// Claimed rows flip to `in_progress` with `claimed_at` set, inside a
    /// single immediate transaction so concurrent workers never claim the
    /// same row.
    pub fn claim_pending_pages(&self, limit: u32) -> Result<Vec<ImagePage>> {
        with_retry(|| {
            let conn = self.connect()?;
            conn.execute_batch("BEGIN IMMEDIATE")?;

            let result: Result<Vec<ImagePage>> = (|| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM image_pages WHERE ocr_state = 'pending'
                     ORDER BY updated_at ASC LIMIT ?",
                )?;
                let mut pages: Vec<ImagePage> = stmt
                    .query_map(params![limit], row_to_page)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let now = Utc::now();
                for page in &mut pages {
                    conn.execute(
                        "UPDATE image_pages
                         SET ocr_state = 'in_progress', claimed_at = ?2, updated_at = ?2
                         WHERE id = ?1",
                        params![page.id, now.to_rfc3339()],
                    )?;
                    page.ocr_state = OcrState::InProgress;
                    page.claimed_at = Some(now);
                    page.updated_at = now;
                }
                Ok(pages)
            })();

            if result.is_ok() {
                conn.execute_batch("COMMIT")?;
            } else {
                let _ = conn.execute_batch("ROLLBACK");
            }
            result
        })
    }

    /// Release a claim, returning the page to `pending` (shutdown path).
    pub fn release_page_claim(&self, page_id: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE image_pages
             SET ocr_state = 'pending', claimed_at = NULL, updated_at = ?2
             WHERE id = ?1 AND ocr_state = 'in_progress'",
            params![page_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record a transient failure: bump attempts and return to `pending`
    /// until the attempt budget is exhausted, then park in `failed`.
    pub fn record_page_failure(
        &self,
        page_id: &str,
        error: &str,
        max_attempts: u32,
        permanent: bool,
    ) -> Result<OcrState> {
        with_retry(|| {
            let conn = self.connect()?;
            let attempts: i64 = conn
                .query_row(
                    "SELECT attempts FROM image_pages WHERE id = ?",
                    params![page_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);

            let attempts = attempts + 1;
            let next_state = if permanent || attempts >= max_attempts as i64 {
                OcrState::Failed
            } else {
                OcrState::Pending
            };

            conn.execute(
                "UPDATE image_pages
                 SET ocr_state = ?2, attempts = ?3, last_error = ?4,
                     claimed_at = NULL, updated_at = ?5
                 WHERE id = ?1",
                params![
                    page_id,
                    next_state.as_str(),
                    attempts,
                    error,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(next_state)
        })
    }

    /// Reset failed pages to pending for reprocessing.
    pub fn reset_failed_pages(&self) -> Result<u64> {
        let conn = self.connect()?;
        let n = conn.execute(
            "UPDATE image_pages
             SET ocr_state = 'pending', attempts = 0, last_error = NULL, updated_at = ?
             WHERE ocr_state = 'failed'",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(n as u64)
    }

    /// Return stale `in_progress` claims to `pending`.
    ///
    /// A claim is stale when its holder has not touched the row for longer
    /// than `ttl_seconds` (crashed or killed worker).
    pub fn reap_stale_claims(&self, ttl_seconds: u64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::seconds(ttl_seconds as i64);
        let conn = self.connect()?;
        let n = conn.execute(
            "UPDATE image_pages
             SET ocr_state = 'pending', claimed_at = NULL, updated_at = ?2
             WHERE ocr_state = 'in_progress' AND claimed_at IS NOT NULL AND claimed_at < ?1",
            params![cutoff.to_rfc3339(), Utc::now().to_rfc3339()],
        )?;
        Ok(n as u64)
    }
}

fn row_to_page(row: &Row) -> rusqlite::Result<ImagePage> {
    let state_str: String = row.get("ocr_state")?;
    Ok(ImagePage {
        id: row.get("id")?,
        document_id: row.get("document_id")?,
        page_number: row.get::<_, i64>("page_number")? as u32,
        image_path: row.get("image_path")?,
        width: row.get::<_, i64>("width")? as u32,
        height: row.get::<_, i64>("height")? as u32,
        ocr_state: OcrState::parse(&state_str).unwrap_or(OcrState::Pending),
        attempts: row.get::<_, i64>("attempts")? as u32,
        last_error: row.get("last_error")?,
        claimed_at: parse_datetime_opt(row.get("claimed_at")?),
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_repo;
    use crate::models::{Document, FileType, ImagePage, OcrState};

    fn seed_doc_with_pages(repo: &super::Repository, n: u32) -> String {
        let doc = Document::new(
            Document::content_id(format!("doc-{n}").as_bytes()),
            "https://example.com/doc.pdf".into(),
            "doc.pdf".into(),
            FileType::Pdf,
            100,
            serde_json::json!({}),
        );
        repo.save_document(&doc).unwrap();
        for page_num in 1..=n {
            let page = ImagePage::new(doc.id.clone(), page_num, 800, 1000);
            repo.save_page(&page).unwrap();
        }
        doc.id
    }

    #[test]
    fn test_save_page_is_idempotent() {
        let (_dir, repo) = temp_repo();
        let doc_id = seed_doc_with_pages(&repo, 1);
        let page = ImagePage::new(doc_id.clone(), 1, 800, 1000);
        repo.save_page(&page).unwrap();
        assert_eq!(repo.count_pages_for_document(&doc_id).unwrap(), 1);
    }

    #[test]
    fn test_claim_flips_state_once() {
        let (_dir, repo) = temp_repo();
        seed_doc_with_pages(&repo, 3);

        let first = repo.claim_pending_pages(2).unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|p| p.ocr_state == OcrState::InProgress));

        let second = repo.claim_pending_pages(2).unwrap();
        assert_eq!(second.len(), 1);

        let third = repo.claim_pending_pages(2).unwrap();
        assert!(third.is_empty());
    }

    #[test]
    fn test_transient_failure_returns_to_pending_until_budget() {
        let (_dir, repo) = temp_repo();
        let doc_id = seed_doc_with_pages(&repo, 1);
        let page_id = ImagePage::page_id(&doc_id, 1);

        for attempt in 1..5u32 {
            let state = repo
                .record_page_failure(&page_id, "timeout", 5, false)
                .unwrap();
            assert_eq!(state, OcrState::Pending, "attempt {attempt}");
        }
        let state = repo
            .record_page_failure(&page_id, "timeout", 5, false)
            .unwrap();
        assert_eq!(state, OcrState::Failed);
    }

    #[test]
    fn test_permanent_failure_fails_immediately() {
        let (_dir, repo) = temp_repo();
        let doc_id = seed_doc_with_pages(&repo, 1);
        let page_id = ImagePage::page_id(&doc_id, 1);
        let state = repo
            .record_page_failure(&page_id, "corrupt image", 5, true)
            .unwrap();
        assert_eq!(state, OcrState::Failed);
        let page = repo.get_page(&page_id).unwrap().unwrap();
        assert_eq!(page.last_error.as_deref(), Some("corrupt image"));
    }

    #[test]
    fn test_reaper_returns_stale_claims() {
        let (_dir, repo) = temp_repo();
        seed_doc_with_pages(&repo, 1);
        let claimed = repo.claim_pending_pages(1).unwrap();
        assert_eq!(claimed.len(), 1);

        // Fresh claim is not reaped.
        assert_eq!(repo.reap_stale_claims(900).unwrap(), 0);
        // TTL of zero makes every claim stale.
        assert_eq!(repo.reap_stale_claims(0).unwrap(), 1);
        assert_eq!(
            repo.count_pages_in_state(OcrState::Pending).unwrap(),
            1
        );
    }
}
