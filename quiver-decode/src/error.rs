//! Error types for fetching and decoding.
//!
//! Both enums are `Clone` because one failure is fanned out to every waiter
//! of a coalesced request.

use std::io;
use thiserror::Error;

/// Failure to produce a byte stream for a URI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The source does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote transport failed (unreachable host, bad status, truncated body).
    #[error("Network error: {0}")]
    Network(String),

    /// Local read failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// No fetcher handles this kind of source.
    #[error("Unsupported source: {0}")]
    Unsupported(String),
}

impl FetchError {
    /// Returns true if a later attempt could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Io(_))
    }
}

impl From<io::Error> for FetchError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Failure to turn bytes into a bounded image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Opening the source stream failed.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The bytes are not a valid image.
    #[error("Malformed image: {0}")]
    Malformed(String),

    /// Recognized but unsupported format or feature.
    #[error("Unsupported image format: {0}")]
    Unsupported(String),

    /// Decoding would need more memory than the decoder allows.
    #[error("Image too large to decode: {0}")]
    TooLarge(String),

    /// The header or the decoded result has a zero width or height.
    #[error("Image has zero dimension ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        use image::ImageError;
        match err {
            ImageError::Unsupported(e) => Self::Unsupported(e.to_string()),
            ImageError::Limits(e) => Self::TooLarge(e.to_string()),
            ImageError::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Self::Malformed(format!("truncated image data: {e}"))
            }
            ImageError::IoError(e) => Self::Fetch(e.into()),
            other => Self::Malformed(other.to_string()),
        }
    }
}

impl From<jpeg_decoder::Error> for DecodeError {
    fn from(err: jpeg_decoder::Error) -> Self {
        match err {
            jpeg_decoder::Error::Unsupported(feature) => Self::Unsupported(format!("{feature:?}")),
            jpeg_decoder::Error::Io(e) => Self::Fetch(e.into()),
            other => Self::Malformed(other.to_string()),
        }
    }
}
