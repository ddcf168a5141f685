//! OCR text, entity, and search index rows.
//!
//! Downstream rows for a page are always replaced as a unit: one
//! transaction deletes the old OCR text (cascading to entities and the
//! search row), inserts the new rows, and flips the page state.

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, with_retry, Repository, Result};
use crate::models::{
    BoundingBox, Entity, EntityKind, OcrState, OcrText, SearchRecord, WordBox,
};

impl Repository {
    /// Store the complete OCR output for a page and mark it done.
    pub fn store_page_results(
        &self,
        ocr: &OcrText,
        entities: &[Entity],
        search: &SearchRecord,
    ) -> Result<()> {
        let word_boxes = serde_json::to_string(&ocr.word_boxes)?;
        let tokens = serde_json::to_string(&search.tokens)?;

        with_retry(|| {
            let conn = self.connect()?;
            conn.execute_batch("BEGIN IMMEDIATE")?;

            let result: Result<()> = (|| {
                // Replace any previous run for this page; FK cascades take
                // the old entities and search row with it.
                conn.execute(
                    "DELETE FROM ocr_texts WHERE page_id = ?",
                    params![ocr.page_id],
                )?;

                conn.execute(
                    r#"INSERT INTO ocr_texts
                       (id, page_id, document_id, page_number, raw_text, normalized_text,
                        word_boxes, bbox_x, bbox_y, bbox_width, bbox_height,
                        page_confidence, engine, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"#,
                    params![
                        ocr.id,
                        ocr.page_id,
                        ocr.document_id,
                        ocr.page_number as i64,
                        ocr.raw_text,
                        ocr.normalized_text,
                        word_boxes,
                        ocr.bbox.x as f64,
                        ocr.bbox.y as f64,
                        ocr.bbox.width as f64,
                        ocr.bbox.height as f64,
                        ocr.page_confidence as f64,
                        ocr.engine,
                        ocr.created_at.to_rfc3339(),
                    ],
                )?;

                for entity in entities {
                    conn.execute(
                        r#"INSERT INTO entities
                           (id, ocr_id, document_id, page_number, entity_type, entity_value,
                            normalized_value, bbox_x, bbox_y, bbox_width, bbox_height, confidence)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
                        params![
                            entity.id,
                            entity.ocr_id,
                            entity.document_id,
                            entity.page_number as i64,
                            entity.kind.as_str(),
                            entity.value,
                            entity.normalized_value,
                            entity.bbox.map(|b| b.x as f64),
                            entity.bbox.map(|b| b.y as f64),
                            entity.bbox.map(|b| b.width as f64),
                            entity.bbox.map(|b| b.height as f64),
                            entity.confidence as f64,
                        ],
                    )?;
                }

                conn.execute(
                    r#"INSERT INTO search_index
                       (id, ocr_id, document_id, searchable_text, tokens)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![
                        search.id,
                        search.ocr_id,
                        search.document_id,
                        search.searchable_text,
                        tokens,
                    ],
                )?;

                conn.execute(
                    "UPDATE image_pages
                     SET ocr_state = 'done', attempts = 0, last_error = NULL,
                         claimed_at = NULL, updated_at = ?2
                     WHERE id = ?1",
                    params![ocr.page_id, chrono::Utc::now().to_rfc3339()],
                )?;

                Ok(())
            })();

            if result.is_ok() {
                conn.execute_batch("COMMIT")?;
            } else {
                let _ = conn.execute_batch("ROLLBACK");
            }
            result
        })
    }

    /// Fetch the OCR text for a page, if any.
    pub fn get_ocr_text_for_page(&self, page_id: &str) -> Result<Option<OcrText>> {
        let conn = self.connect()?;
        let ocr = conn
            .query_row(
                "SELECT * FROM ocr_texts WHERE page_id = ?",
                params![page_id],
                row_to_ocr_text,
            )
            .optional()?;
        Ok(ocr)
    }

    /// Fetch an OCR text by id.
    pub fn get_ocr_text(&self, ocr_id: &str) -> Result<Option<OcrText>> {
        let conn = self.connect()?;
        let ocr = conn
            .query_row(
                "SELECT * FROM ocr_texts WHERE id = ?",
                params![ocr_id],
                row_to_ocr_text,
            )
            .optional()?;
        Ok(ocr)
    }

    /// All OCR texts of a document, in page order.
    pub fn get_ocr_texts_for_document(&self, document_id: &str) -> Result<Vec<OcrText>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM ocr_texts WHERE document_id = ? ORDER BY page_number")?;
        let texts = stmt
            .query_map(params![document_id], row_to_ocr_text)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(texts)
    }

    /// Count OCR text rows.
    pub fn count_ocr_texts(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM ocr_texts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete one OCR text; entities and the search row cascade.
    pub fn delete_ocr_text(&self, ocr_id: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM ocr_texts WHERE id = ?", params![ocr_id])?;
        Ok(())
    }

    /// Entities referencing an OCR text.
    pub fn get_entities_for_ocr(&self, ocr_id: &str) -> Result<Vec<Entity>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM entities WHERE ocr_id = ?")?;
        let entities = stmt
            .query_map(params![ocr_id], row_to_entity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    /// Exact lookup by kind and normalized value.
    pub fn find_entities(
        &self,
        kind: EntityKind,
        normalized_value: &str,
        limit: u32,
    ) -> Result<Vec<Entity>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM entities
             WHERE entity_type = ? AND normalized_value = ?
             LIMIT ?",
        )?;
        let entities = stmt
            .query_map(params![kind.as_str(), normalized_value, limit], row_to_entity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    /// Case-insensitive fallback lookup on the as-found value.
    pub fn find_entities_by_value(
        &self,
        kind: EntityKind,
        value: &str,
        limit: u32,
    ) -> Result<Vec<Entity>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM entities
             WHERE entity_type = ? AND entity_value = ? COLLATE NOCASE
             LIMIT ?",
        )?;
        let entities = stmt
            .query_map(params![kind.as_str(), value, limit], row_to_entity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    /// List entities with optional filters, for the entities API.
    pub fn list_entities(
        &self,
        kind: Option<EntityKind>,
        document_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Entity>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM entities
             WHERE (?1 IS NULL OR entity_type = ?1)
               AND (?2 IS NULL OR document_id = ?2)
             ORDER BY entity_type, normalized_value
             LIMIT ?3",
        )?;
        let entities = stmt
            .query_map(
                params![kind.map(|k| k.as_str()), document_id, limit],
                row_to_entity,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    /// All search index rows (the in-process search engine scans them).
    pub fn get_search_records(&self) -> Result<Vec<SearchRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM search_index")?;
        let records = stmt
            .query_map([], row_to_search_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Search index row for one OCR text.
    pub fn get_search_record_for_ocr(&self, ocr_id: &str) -> Result<Option<SearchRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT * FROM search_index WHERE ocr_id = ?",
                params![ocr_id],
                row_to_search_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Count search index rows.
    pub fn count_search_records(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM search_index", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Verify the page is still claimed before writing results; a reaped
    /// claim means another worker may own the page now.
    pub fn page_claim_held(&self, page_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let state: Option<String> = conn
            .query_row(
                "SELECT ocr_state FROM image_pages WHERE id = ?",
                params![page_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state.as_deref() == Some(OcrState::InProgress.as_str()))
    }
}

fn row_to_ocr_text(row: &Row) -> rusqlite::Result<OcrText> {
    let word_boxes_str: String = row.get("word_boxes")?;
    let word_boxes: Vec<WordBox> = serde_json::from_str(&word_boxes_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(OcrText {
        id: row.get("id")?,
        page_id: row.get("page_id")?,
        document_id: row.get("document_id")?,
        page_number: row.get::<_, i64>("page_number")? as u32,
        raw_text: row.get("raw_text")?,
        normalized_text: row.get("normalized_text")?,
        word_boxes,
        bbox: BoundingBox::new(
            row.get::<_, f64>("bbox_x")? as f32,
            row.get::<_, f64>("bbox_y")? as f32,
            row.get::<_, f64>("bbox_width")? as f32,
            row.get::<_, f64>("bbox_height")? as f32,
        ),
        page_confidence: row.get::<_, f64>("page_confidence")? as f32,
        engine: row.get("engine")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
    })
}

fn row_to_entity(row: &Row) -> rusqlite::Result<Entity> {
    let kind_str: String = row.get("entity_type")?;
    let bbox = match (
        row.get::<_, Option<f64>>("bbox_x")?,
        row.get::<_, Option<f64>>("bbox_y")?,
        row.get::<_, Option<f64>>("bbox_width")?,
        row.get::<_, Option<f64>>("bbox_height")?,
    ) {
        (Some(x), Some(y), Some(w), Some(h)) => {
            Some(BoundingBox::new(x as f32, y as f32, w as f32, h as f32))
        }
        _ => None,
    };
    Ok(Entity {
        id: row.get("id")?,
        ocr_id: row.get("ocr_id")?,
        document_id: row.get("document_id")?,
        page_number: row.get::<_, i64>("page_number")? as u32,
        kind: EntityKind::parse(&kind_str).unwrap_or(EntityKind::Keyword),
        value: row.get("entity_value")?,
        normalized_value: row.get("normalized_value")?,
        bbox,
        confidence: row.get::<_, f64>("confidence")? as f32,
    })
}

fn row_to_search_record(row: &Row) -> rusqlite::Result<SearchRecord> {
    let tokens_str: String = row.get("tokens")?;
    let tokens: Vec<String> = serde_json::from_str(&tokens_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(SearchRecord {
        id: row.get("id")?,
        ocr_id: row.get("ocr_id")?,
        document_id: row.get("document_id")?,
        searchable_text: row.get("searchable_text")?,
        tokens,
    })
}
