//! Error types for the image engine.

use quiver_cache::CacheError;
use quiver_common::UriError;
use quiver_decode::{DecodeError, FetchError};
use std::io;
use thiserror::Error;

/// Why a request did not produce an image.
///
/// Every waiter of a coalesced request receives a clone of the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The URI could not be parsed or uses an unknown scheme.
    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] UriError),

    /// The source bytes could not be obtained.
    #[error("Fetch failed: {0}")]
    Fetch(FetchError),

    /// The bytes were obtained but are not a usable image.
    #[error("Decode failed: {0}")]
    Decode(DecodeError),

    /// The engine is paused and the request was not already cached or running.
    #[error("Engine is paused")]
    Paused,

    /// The caller dropped interest before the result arrived.
    #[error("Request cancelled")]
    Cancelled,

    /// The task body panicked.
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The engine has been shut down.
    #[error("Engine shut down")]
    Shutdown,
}

impl LoadError {
    /// Returns true if this error is potentially retryable.
    ///
    /// Transient I/O and network failures may succeed later, and paused or
    /// cancelled requests can simply be issued again. Malformed input and
    /// unknown schemes will fail the same way every time.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_retryable(),
            Self::Decode(DecodeError::Fetch(e)) => e.is_retryable(),
            Self::Paused | Self::Cancelled => true,
            _ => false,
        }
    }

    /// Returns true if this is a fatal error that should not be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

impl From<FetchError> for LoadError {
    fn from(err: FetchError) -> Self {
        Self::Fetch(err)
    }
}

impl From<DecodeError> for LoadError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Fetch(e) => Self::Fetch(e),
            other => Self::Decode(other),
        }
    }
}

/// Errors raised while configuring or managing the engine itself.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration values are invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading a configuration file or creating a directory failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configuration file is not valid TOML for [`EngineConfig`](crate::EngineConfig).
    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    /// A disk cache maintenance operation failed.
    #[error("Disk cache error: {0}")]
    Cache(#[from] CacheError),
}
