//! Re-openable byte sources.
//!
//! The decoder reads a source twice: once to probe the header, once to decode.
//! A [`StreamOpener`] hands out a fresh, independent stream on every call.

use crate::error::FetchError;
use bytes::Bytes;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::path::{Path, PathBuf};

/// A readable, seekable byte stream positioned at the start of an image.
pub trait ImageStream: BufRead + Seek + Send {}

impl<T: BufRead + Seek + Send> ImageStream for T {}

/// Produces independent streams over the same bytes.
pub trait StreamOpener: Send + Sync {
    /// Open a new stream positioned at offset zero.
    fn open(&self) -> Result<Box<dyn ImageStream + '_>, FetchError>;

    /// Human-readable origin, used in diagnostics.
    fn describe(&self) -> String;
}

/// Source bytes as handed from a fetcher to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawBytesHandle {
    /// A local file, re-opened on every read.
    File(PathBuf),
    /// Bytes already held in memory (network bodies, disk cache hits, resources).
    Buffered(Bytes),
}

impl RawBytesHandle {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }

    pub fn buffered(bytes: impl Into<Bytes>) -> Self {
        Self::Buffered(bytes.into())
    }

    /// Read the whole source into memory.
    pub fn to_bytes(&self) -> Result<Bytes, FetchError> {
        match self {
            Self::File(path) => Ok(Bytes::from(std::fs::read(path)?)),
            Self::Buffered(bytes) => Ok(bytes.clone()),
        }
    }
}

impl StreamOpener for RawBytesHandle {
    fn open(&self) -> Result<Box<dyn ImageStream + '_>, FetchError> {
        match self {
            Self::File(path) => {
                let file = File::open(path)?;
                Ok(Box::new(BufReader::new(file)))
            }
            Self::Buffered(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Buffered(bytes) => format!("<{} buffered bytes>", bytes.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn read_all(opener: &dyn StreamOpener) -> Vec<u8> {
        let mut out = Vec::new();
        opener.open().unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn buffered_opens_independent_streams() {
        let handle = RawBytesHandle::buffered(&b"abcdef"[..]);
        let mut first = handle.open().unwrap();
        let mut buf = [0u8; 3];
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        assert_eq!(read_all(&handle), b"abcdef");
    }

    #[test]
    fn file_reopens_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.bin");
        std::fs::write(&path, b"0123").unwrap();
        let handle = RawBytesHandle::file(&path);
        assert_eq!(read_all(&handle), b"0123");
        assert_eq!(read_all(&handle), b"0123");
        assert_eq!(handle.to_bytes().unwrap(), Bytes::from_static(b"0123"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let handle = RawBytesHandle::file("/nonexistent/quiver/img.png");
        assert!(matches!(handle.open().map(|_| ()), Err(FetchError::NotFound(_))));
    }
}
