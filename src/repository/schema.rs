//! Database schema initialization and migrations.

use rusqlite::params;
use tracing::info;

use super::{Repository, Result};

/// Current storage format version. Increment when the schema changes.
pub(crate) const STORAGE_FORMAT_VERSION: i32 = 2;

impl Repository {
    /// Initialize the database schema.
    pub(crate) fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                page_count INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS image_pages (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                image_path TEXT NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                ocr_state TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                claimed_at TEXT,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
                UNIQUE(document_id, page_number)
            );

            CREATE TABLE IF NOT EXISTS ocr_texts (
                id TEXT PRIMARY KEY,
                page_id TEXT NOT NULL UNIQUE,
                document_id TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                raw_text TEXT NOT NULL,
                normalized_text TEXT NOT NULL,
                word_boxes TEXT NOT NULL,
                bbox_x REAL NOT NULL,
                bbox_y REAL NOT NULL,
                bbox_width REAL NOT NULL,
                bbox_height REAL NOT NULL,
                page_confidence REAL NOT NULL,
                engine TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (page_id) REFERENCES image_pages(id) ON DELETE CASCADE,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                ocr_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                entity_type TEXT NOT NULL,
                entity_value TEXT NOT NULL,
                normalized_value TEXT,
                bbox_x REAL,
                bbox_y REAL,
                bbox_width REAL,
                bbox_height REAL,
                confidence REAL NOT NULL,
                FOREIGN KEY (ocr_id) REFERENCES ocr_texts(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS search_index (
                id TEXT PRIMARY KEY,
                ocr_id TEXT NOT NULL UNIQUE,
                document_id TEXT NOT NULL,
                searchable_text TEXT NOT NULL,
                tokens TEXT NOT NULL,
                FOREIGN KEY (ocr_id) REFERENCES ocr_texts(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS ingest_state (
                name TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 1,
                last_run_started_at TEXT,
                last_run_completed_at TEXT,
                last_error TEXT,
                heartbeat_at TEXT
            );

            CREATE TABLE IF NOT EXISTS storage_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_source_url
                ON documents(source_url);
            CREATE INDEX IF NOT EXISTS idx_image_pages_document
                ON image_pages(document_id, page_number);
            CREATE INDEX IF NOT EXISTS idx_image_pages_state
                ON image_pages(ocr_state)
                WHERE ocr_state IN ('pending', 'in_progress');
            CREATE INDEX IF NOT EXISTS idx_ocr_texts_document
                ON ocr_texts(document_id);
            CREATE INDEX IF NOT EXISTS idx_entities_ocr
                ON entities(ocr_id);
            CREATE INDEX IF NOT EXISTS idx_entities_lookup
                ON entities(entity_type, normalized_value);
        "#,
        )?;
        Ok(())
    }

    /// Run format-version migrations if the stored version is behind.
    pub(crate) fn migrate(&self) -> Result<()> {
        let conn = self.connect()?;

        let current: i32 = conn
            .query_row(
                "SELECT value FROM storage_meta WHERE key = 'format_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        if current < STORAGE_FORMAT_VERSION {
            info!(
                "Migrating storage from version {} to {}",
                current, STORAGE_FORMAT_VERSION
            );

            if current < 2 {
                // v1 databases predate the retry bookkeeping columns.
                let _ = conn.execute("ALTER TABLE image_pages ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0", []);
                let _ = conn.execute("ALTER TABLE image_pages ADD COLUMN last_error TEXT", []);
                let _ = conn.execute("ALTER TABLE image_pages ADD COLUMN claimed_at TEXT", []);
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO storage_meta (key, value) VALUES ('format_version', ?)",
            params![STORAGE_FORMAT_VERSION.to_string()],
        )?;

        Ok(())
    }
}
