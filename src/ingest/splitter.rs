//! Page splitter: documents in, page rasters out.
//!
//! PDFs are rasterized with pdftoppm at a fixed DPI; single-image files
//! become one-page documents. Every page lands in the blob store under
//! `images/{page_id}.png` with an ImagePage row in `pending`.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::models::{Document, ImagePage};
use crate::repository::Repository;
use crate::storage::BlobStore;

/// Splits documents into per-page PNG rasters.
pub struct PageSplitter {
    repo: Arc<Repository>,
    blobs: Arc<dyn BlobStore>,
    dpi: u32,
}

impl PageSplitter {
    pub fn new(repo: Arc<Repository>, blobs: Arc<dyn BlobStore>, dpi: u32) -> Self {
        Self { repo, blobs, dpi }
    }

    /// Split a stored document into pages. Returns the page count.
    ///
    /// Idempotent: existing page rows are kept, so re-splitting a
    /// document never duplicates pages.
    pub fn split_document(&self, doc: &Document) -> Result<u32> {
        let bytes = self.blobs.get(&doc.blob_key())?;

        let page_images: Vec<Vec<u8>> = if doc.file_type.is_pdf() {
            self.rasterize_pdf(&bytes)?
        } else {
            vec![reencode_png(&bytes)?]
        };

        for (index, png) in page_images.iter().enumerate() {
            let page_number = index as u32 + 1;
            let (width, height) = png_dimensions(png)?;
            let page = ImagePage::new(doc.id.clone(), page_number, width, height);
            self.blobs.put(&page.image_path, png)?;
            self.repo.save_page(&page)?;
        }

        let page_count = page_images.len() as u32;
        self.repo.set_page_count(&doc.id, page_count)?;
        tracing::info!("split document {} into {} pages", doc.id, page_count);
        Ok(page_count)
    }

    /// Rasterize every PDF page to PNG via pdftoppm.
    fn rasterize_pdf(&self, pdf_bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        let temp_dir = TempDir::new()?;
        let pdf_path = temp_dir.path().join("input.pdf");
        std::fs::write(&pdf_path, pdf_bytes)?;

        let output_prefix = temp_dir.path().join("page");
        let status = Command::new("pdftoppm")
            .args(["-png", "-r", &self.dpi.to_string()])
            .arg(&pdf_path)
            .arg(&output_prefix)
            .status();

        match status {
            Ok(s) if s.success() => {}
            Ok(_) => {
                return Err(Error::PermanentUpstream(
                    "pdftoppm failed to convert PDF (corrupt file?)".to_string(),
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Internal(
                    "pdftoppm not found (install poppler-utils)".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        }

        let mut pages = collect_page_files(temp_dir.path())?;
        if pages.is_empty() {
            return Err(Error::PermanentUpstream(
                "no pages rasterized from PDF".to_string(),
            ));
        }
        pages.sort();

        let mut images = Vec::with_capacity(pages.len());
        for path in pages {
            images.push(std::fs::read(path)?);
        }
        Ok(images)
    }
}

/// List the page-NN.png files pdftoppm produced.
fn collect_page_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut pages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with("page-") && name.ends_with(".png") {
            pages.push(path);
        }
    }
    Ok(pages)
}

/// Decode any supported image format and re-encode as PNG.
fn reencode_png(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::PermanentUpstream(format!("corrupt image file: {e}")))?;
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| Error::Internal(format!("failed to encode PNG: {e}")))?;
    Ok(out)
}

/// Dimensions of an encoded PNG.
fn png_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::Internal(format!("failed to decode page raster: {e}")))?;
    Ok((img.width(), img.height()))
}
