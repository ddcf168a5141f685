//! Remote vision-API OCR backend (Textract-style).
//!
//! Posts the page image to an HTTP endpoint that returns word-level
//! blocks. Requires SCANSIFT_TEXTRACT_ENDPOINT; an optional bearer token
//! comes from SCANSIFT_TEXTRACT_API_KEY. Retries on 429 honoring
//! Retry-After.

use std::time::Duration;

use base64::Engine as _;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::backend::{OcrBackend, OcrEngineKind, OcrError, OcrPageResult};
use crate::models::WordBox;

/// Maximum retry attempts on rate limit responses.
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    image: String,
    languages: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    words: Vec<DetectedWord>,
}

/// One word block with coordinates relative to the submitted image.
/// Endpoints reporting ratios in [0,1] are rescaled to pixels.
#[derive(Debug, Deserialize)]
struct DetectedWord {
    text: String,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
}

/// HTTP vision-API OCR backend.
pub struct TextractBackend {
    endpoint: Option<String>,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl TextractBackend {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: std::env::var("SCANSIFT_TEXTRACT_ENDPOINT").ok(),
            api_key: std::env::var("SCANSIFT_TEXTRACT_API_KEY").ok(),
            client,
        }
    }

    fn post_image(
        &self,
        endpoint: &str,
        body: &DetectRequest<'_>,
    ) -> Result<DetectResponse, OcrError> {
        let mut attempt = 0;
        loop {
            let mut request = self.client.post(endpoint).json(body);
            if let Some(ref key) = self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request
                .send()
                .map_err(|e| OcrError::OcrFailed(format!("textract request failed: {e}")))?;

            let status = response.status();
            if status.as_u16() == 429 && attempt < MAX_RETRIES {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1 << attempt);
                tracing::debug!("textract rate limited, retrying in {}s", retry_after);
                std::thread::sleep(Duration::from_secs(retry_after.min(30)));
                attempt += 1;
                continue;
            }
            if status.as_u16() == 429 {
                return Err(OcrError::RateLimited {
                    backend: OcrEngineKind::Textract,
                    retry_after_secs: None,
                });
            }
            if !status.is_success() {
                return Err(OcrError::OcrFailed(format!(
                    "textract endpoint returned {status}"
                )));
            }

            return response
                .json::<DetectResponse>()
                .map_err(|e| OcrError::OcrFailed(format!("textract response malformed: {e}")));
        }
    }
}

impl Default for TextractBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrBackend for TextractBackend {
    fn kind(&self) -> OcrEngineKind {
        OcrEngineKind::Textract
    }

    fn is_available(&self) -> bool {
        self.endpoint.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.endpoint.is_some() {
            "textract endpoint configured".to_string()
        } else {
            "set SCANSIFT_TEXTRACT_ENDPOINT (and optionally SCANSIFT_TEXTRACT_API_KEY)"
                .to_string()
        }
    }

    fn extract(
        &self,
        image: &DynamicImage,
        languages: &[String],
    ) -> Result<OcrPageResult, OcrError> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            OcrError::BackendNotAvailable(self.availability_hint())
        })?;

        let mut png = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| OcrError::ImageError(e.to_string()))?;

        let request = DetectRequest {
            image: base64::engine::general_purpose::STANDARD.encode(&png),
            languages,
        };
        let response = self.post_image(endpoint, &request)?;

        let (img_w, img_h) = (image.width() as f32, image.height() as f32);
        let word_boxes: Vec<WordBox> = response
            .words
            .into_iter()
            .filter(|w| !w.text.trim().is_empty())
            .map(|w| {
                // Ratio-coordinate endpoints report everything inside the
                // unit square; rescale those to pixels.
                let ratio = w.x <= 1.0 && w.y <= 1.0 && w.width <= 1.0 && w.height <= 1.0;
                let (scale_x, scale_y) = if ratio { (img_w, img_h) } else { (1.0, 1.0) };
                WordBox {
                    text: w.text.trim().to_string(),
                    x: w.x * scale_x,
                    y: w.y * scale_y,
                    width: w.width * scale_x,
                    height: w.height * scale_y,
                    confidence: if w.confidence > 1.0 {
                        (w.confidence / 100.0).clamp(0.0, 1.0)
                    } else {
                        w.confidence.clamp(0.0, 1.0)
                    },
                }
            })
            .collect();

        Ok(OcrPageResult::from_word_boxes(
            word_boxes,
            &OcrEngineKind::Textract,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_without_endpoint() {
        // Construct directly so ambient env vars cannot leak in.
        let backend = TextractBackend {
            endpoint: None,
            api_key: None,
            client: reqwest::blocking::Client::new(),
        };
        assert!(!backend.is_available());
        let img = DynamicImage::new_rgb8(4, 4);
        let err = backend.extract(&img, &[]).unwrap_err();
        assert!(matches!(err, OcrError::BackendNotAvailable(_)));
    }
}
