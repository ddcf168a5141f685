//! Tesseract OCR backend.
//!
//! Drives the `tesseract` binary with TSV output so word-level boxes and
//! confidences survive. This is the default, widely available engine.

use std::path::Path;
use std::process::Command;

use image::DynamicImage;
use tempfile::TempDir;

use super::backend::{OcrBackend, OcrEngineKind, OcrError, OcrPageResult};
use crate::models::WordBox;

/// Map ISO language codes to tesseract traineddata names.
fn tesseract_lang(codes: &[String]) -> String {
    let mapped: Vec<&str> = codes
        .iter()
        .map(|c| match c.to_lowercase().as_str() {
            "en" | "eng" => "eng",
            "de" | "deu" => "deu",
            "fr" | "fra" => "fra",
            "es" | "spa" => "spa",
            "it" | "ita" => "ita",
            "pt" | "por" => "por",
            "ru" | "rus" => "rus",
            _ => "eng",
        })
        .collect();
    if mapped.is_empty() {
        "eng".to_string()
    } else {
        mapped.join("+")
    }
}

/// Check whether a binary exists on PATH.
pub(crate) fn check_binary(name: &str) -> bool {
    Command::new(name)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Tesseract OCR backend.
pub struct TesseractBackend;

impl TesseractBackend {
    pub fn new() -> Self {
        Self
    }

    /// Run tesseract in TSV mode against an image file.
    fn run_tesseract(&self, image_path: &Path, lang: &str) -> Result<String, OcrError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", lang, "--oem", "3", "--psm", "6", "tsv"])
            .output();

        match output {
            Ok(output) => {
                if output.status.success() {
                    Ok(String::from_utf8_lossy(&output.stdout).to_string())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(OcrError::OcrFailed(format!("tesseract failed: {}", stderr)))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OcrError::BackendNotAvailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ))
            }
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrBackend for TesseractBackend {
    fn kind(&self) -> OcrEngineKind {
        OcrEngineKind::Tesseract
    }

    fn is_available(&self) -> bool {
        check_binary("tesseract")
    }

    fn availability_hint(&self) -> String {
        if check_binary("tesseract") {
            "tesseract is available".to_string()
        } else {
            "tesseract not installed. Install with: apt install tesseract-ocr".to_string()
        }
    }

    fn extract(
        &self,
        image: &DynamicImage,
        languages: &[String],
    ) -> Result<OcrPageResult, OcrError> {
        let temp_dir = TempDir::new()?;
        let image_path = temp_dir.path().join("page.png");
        image
            .save(&image_path)
            .map_err(|e| OcrError::ImageError(e.to_string()))?;

        let tsv = self.run_tesseract(&image_path, &tesseract_lang(languages))?;
        let word_boxes = parse_tsv(&tsv);
        Ok(OcrPageResult::from_word_boxes(
            word_boxes,
            &OcrEngineKind::Tesseract,
        ))
    }
}

/// Parse tesseract TSV output into word boxes.
///
/// Columns: level page block par line word left top width height conf text.
/// Level 5 rows are words; conf is 0-100 with -1 for structural rows.
fn parse_tsv(tsv: &str) -> Vec<WordBox> {
    let mut boxes = Vec::new();
    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        if cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let (Ok(left), Ok(top), Ok(width), Ok(height)) = (
            cols[6].parse::<f32>(),
            cols[7].parse::<f32>(),
            cols[8].parse::<f32>(),
            cols[9].parse::<f32>(),
        ) else {
            continue;
        };
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        if conf < 0.0 {
            continue;
        }
        boxes.push(WordBox {
            text: text.to_string(),
            x: left,
            y: top,
            width,
            height,
            confidence: (conf / 100.0).clamp(0.0, 1.0),
        });
    }
    boxes
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t\n\
5\t1\t1\t1\t1\t1\t72\t85\t120\t24\t96.5\tflight\n\
5\t1\t1\t1\t1\t2\t200\t85\t60\t24\t91.0\tlog\n\
5\t1\t1\t1\t2\t1\t72\t120\t30\t24\t-1\t\n";

    #[test]
    fn test_parse_tsv_words_only() {
        let boxes = parse_tsv(SAMPLE_TSV);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].text, "flight");
        assert_eq!(boxes[0].x, 72.0);
        assert!((boxes[0].confidence - 0.965).abs() < 1e-6);
        assert_eq!(boxes[1].text, "log");
    }

    #[test]
    fn test_parse_tsv_empty_input() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv("level\tpage_num\n").is_empty());
    }

    #[test]
    fn test_language_mapping() {
        assert_eq!(tesseract_lang(&["en".to_string()]), "eng");
        assert_eq!(
            tesseract_lang(&["en".to_string(), "de".to_string()]),
            "eng+deu"
        );
        assert_eq!(tesseract_lang(&[]), "eng");
    }
}
