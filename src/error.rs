//! Crate-wide error type with a stable kind taxonomy.
//!
//! Callers dispatch on `kind()` strings rather than enum variants so the
//! taxonomy survives serialization across the API boundary.

use crate::ocr::OcrError;
use crate::repository::RepositoryError;

/// Errors surfaced by the core pipeline and search API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    #[error("permanent upstream error: {0}")]
    PermanentUpstream(String),

    #[error("capability disabled: {0}")]
    CapabilityDisabled(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable kind string for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Conflict(_) => "conflict",
            Error::TransientUpstream(_) => "transient_upstream",
            Error::PermanentUpstream(_) => "permanent_upstream",
            Error::CapabilityDisabled(_) => "capability_disabled",
            Error::Cancelled(_) => "cancelled",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether a retry with backoff is a reasonable response.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientUpstream(_) | Error::Internal(_))
    }
}

impl From<RepositoryError> for Error {
    fn from(e: RepositoryError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<OcrError> for Error {
    fn from(e: OcrError) -> Self {
        let message = e.to_string();
        match e {
            // Undecodable page bytes will not improve on retry.
            OcrError::ImageError(_) => {
                Error::PermanentUpstream(format!("corrupt page image: {message}"))
            }
            OcrError::RateLimited { .. }
            | OcrError::OcrFailed(_)
            | OcrError::Io(_)
            | OcrError::BackendNotAvailable(_) => Error::TransientUpstream(message),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        match status {
            Some(code) if (400..500).contains(&code) && code != 429 => {
                Error::PermanentUpstream(e.to_string())
            }
            _ => Error::TransientUpstream(e.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(Error::NotFound("x".into()).kind(), "not_found");
        assert_eq!(Error::InvalidArgument("x".into()).kind(), "invalid_argument");
        assert_eq!(Error::Conflict("x".into()).kind(), "conflict");
        assert_eq!(
            Error::TransientUpstream("x".into()).kind(),
            "transient_upstream"
        );
        assert_eq!(
            Error::PermanentUpstream("x".into()).kind(),
            "permanent_upstream"
        );
        assert_eq!(
            Error::CapabilityDisabled("x".into()).kind(),
            "capability_disabled"
        );
        assert_eq!(Error::Cancelled("x".into()).kind(), "cancelled");
        assert_eq!(Error::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::TransientUpstream("timeout".into()).is_transient());
        assert!(!Error::PermanentUpstream("404".into()).is_transient());
        assert!(!Error::InvalidArgument("bad".into()).is_transient());
    }

    #[test]
    fn test_ocr_error_mapping() {
        let corrupt: Error = OcrError::ImageError("bad png".into()).into();
        assert_eq!(corrupt.kind(), "permanent_upstream");
        assert!(!corrupt.is_transient());

        let flaky: Error = OcrError::OcrFailed("engine crashed".into()).into();
        assert_eq!(flaky.kind(), "transient_upstream");
        assert!(flaky.is_transient());
    }

    #[test]
    fn test_repository_error_is_internal() {
        let e: Error = RepositoryError::CorruptRow("row 7".into()).into();
        assert_eq!(e.kind(), "internal");
        assert!(e.is_transient());
    }
}
