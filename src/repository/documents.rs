//! Document row operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, with_retry, Repository, Result};
use crate::models::{Document, FileType};

impl Repository {
    /// Insert or replace a document row.
    ///
    /// Upsert keyed on the content hash: re-ingesting identical bytes
    /// collides on the same row.
    pub fn save_document(&self, doc: &Document) -> Result<()> {
        let metadata = serde_json::to_string(&doc.metadata)?;
        with_retry(|| {
            let conn = self.connect()?;
            conn.execute(
                r#"INSERT INTO documents
                   (id, source_url, file_name, file_type, file_size, page_count, metadata, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                   ON CONFLICT(id) DO UPDATE SET
                       source_url = ?2,
                       file_name = ?3,
                       metadata = ?7"#,
                params![
                    doc.id,
                    doc.source_url,
                    doc.file_name,
                    doc.file_type.as_str(),
                    doc.file_size as i64,
                    doc.page_count as i64,
                    metadata,
                    doc.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch a document by id.
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.connect()?;
        let doc = conn
            .query_row(
                "SELECT * FROM documents WHERE id = ?",
                params![id],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// Whether a document with this id exists.
    pub fn document_exists(&self, id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE id = ?",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Fetch documents by source URL.
    pub fn get_documents_by_url(&self, source_url: &str) -> Result<Vec<Document>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM documents WHERE source_url = ?")?;
        let docs = stmt
            .query_map(params![source_url], row_to_document)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(docs)
    }

    /// Set the page count once splitting completes.
    pub fn set_page_count(&self, document_id: &str, page_count: u32) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE documents SET page_count = ? WHERE id = ?",
            params![page_count as i64, document_id],
        )?;
        Ok(())
    }

    /// Total number of documents.
    pub fn count_documents(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_document(row: &Row) -> rusqlite::Result<Document> {
    let file_type_str: String = row.get("file_type")?;
    let metadata_str: String = row.get("metadata")?;
    Ok(Document {
        id: row.get("id")?,
        source_url: row.get("source_url")?,
        file_name: row.get("file_name")?,
        file_type: FileType::parse(&file_type_str).unwrap_or(FileType::Pdf),
        file_size: row.get::<_, i64>("file_size")? as u64,
        page_count: row.get::<_, i64>("page_count")? as u32,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
    })
}
