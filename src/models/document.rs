//! Document model.
//!
//! A document is an originally downloaded or uploaded file, identified by
//! a content hash so re-ingesting identical bytes lands on the same row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// File types accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Png,
    Jpg,
    Jpeg,
    Tiff,
    Bmp,
    Gif,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Tiff => "tiff",
            Self::Bmp => "bmp",
            Self::Gif => "gif",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "png" => Some(Self::Png),
            "jpg" => Some(Self::Jpg),
            "jpeg" => Some(Self::Jpeg),
            "tiff" | "tif" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    /// Derive the file type from a filename extension.
    pub fn from_filename(name: &str) -> Option<Self> {
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Self::parse(ext)
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, Self::Pdf)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stored document metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Hex SHA-256 of the original file bytes.
    pub id: String,
    /// Canonical URL this document was fetched from.
    pub source_url: String,
    /// Original filename.
    pub file_name: String,
    pub file_type: FileType,
    pub file_size: u64,
    /// Number of raster pages; written once splitting completes.
    pub page_count: u32,
    /// Opaque key/value map (section label from the crawler, etc.).
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Compute the content-hash identifier for a byte stream.
    pub fn content_id(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn new(
        id: String,
        source_url: String,
        file_name: String,
        file_type: FileType,
        file_size: u64,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id,
            source_url,
            file_name,
            file_type,
            file_size,
            page_count: 0,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Blob key under which the original bytes are stored.
    pub fn blob_key(&self) -> String {
        format!("files/{}.{}", self.id, self.file_type.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_is_deterministic() {
        let a = Document::content_id(b"some document bytes");
        let b = Document::content_id(b"some document bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_content_id_differs_on_content() {
        assert_ne!(
            Document::content_id(b"version one"),
            Document::content_id(b"version two")
        );
    }

    #[test]
    fn test_file_type_from_filename() {
        assert_eq!(FileType::from_filename("scan.pdf"), Some(FileType::Pdf));
        assert_eq!(FileType::from_filename("IMG_001.JPG"), Some(FileType::Jpg));
        assert_eq!(FileType::from_filename("page.tif"), Some(FileType::Tiff));
        assert_eq!(FileType::from_filename("noext"), None);
        assert_eq!(FileType::from_filename("archive.zip"), None);
    }

    #[test]
    fn test_blob_key() {
        let doc = Document::new(
            "abc123".into(),
            "https://example.com/x.pdf".into(),
            "x.pdf".into(),
            FileType::Pdf,
            10,
            serde_json::json!({}),
        );
        assert_eq!(doc.blob_key(), "files/abc123.pdf");
    }
}
