//! Blob storage behind a key-value interface.
//!
//! Keys are UTF-8, `/`-delimited, at most 1024 bytes. The pipeline uses
//! the `files/` prefix for original bytes and `images/` for page rasters.

use std::io;
use std::path::{Path, PathBuf};

/// Key-value blob store consumed by the pipeline.
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
    fn get(&self, key: &str) -> io::Result<Vec<u8>>;
    fn exists(&self, key: &str) -> bool;
    /// A URL the caller can hand out for this key.
    fn url(&self, key: &str) -> String;
    /// Remove a blob; used to clean up partial writes on cancellation.
    fn delete(&self, key: &str) -> io::Result<()>;
}

/// Validate a blob key: UTF-8 is guaranteed by &str, so check length and
/// path shape.
fn validate_key(key: &str) -> io::Result<()> {
    if key.is_empty() || key.len() > 1024 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid blob key length: {}", key.len()),
        ));
    }
    if key.starts_with('/') || key.split('/').any(|seg| seg.is_empty() || seg == "..") {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid blob key: {key}"),
        ));
    }
    Ok(())
}

/// Filesystem-backed blob store rooted at a directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write through a temp name so readers never observe partial blobs.
        let tmp = path.with_extension("part");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self, key: &str) -> io::Result<Vec<u8>> {
        validate_key(key)?;
        std::fs::read(self.path_for(key))
    }

    fn exists(&self, key: &str) -> bool {
        validate_key(key).is_ok() && self.path_for(key).exists()
    }

    fn url(&self, key: &str) -> String {
        format!("file://{}", self.path_for(key).display())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        store.put("files/abc.pdf", b"content").unwrap();
        assert!(store.exists("files/abc.pdf"));
        assert_eq!(store.get("files/abc.pdf").unwrap(), b"content");
    }

    #[test]
    fn test_missing_key() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(!store.exists("files/nope.pdf"));
        assert!(store.get("files/nope.pdf").is_err());
    }

    #[test]
    fn test_rejects_traversal_keys() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(store.put("../escape", b"x").is_err());
        assert!(store.put("/absolute", b"x").is_err());
        assert!(store.put("a//b", b"x").is_err());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        store.put("images/p.png", b"png").unwrap();
        store.delete("images/p.png").unwrap();
        store.delete("images/p.png").unwrap();
        assert!(!store.exists("images/p.png"));
    }

    #[test]
    fn test_url_points_at_blob() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        store.put("images/p.png", b"png").unwrap();
        let url = store.url("images/p.png");
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("images/p.png"));
    }
}
