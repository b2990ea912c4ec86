//! Byte sources for each URI scheme.
//!
//! A [`Fetcher`] turns an [`ImageUri`] into a re-openable [`RawBytesHandle`].
//! [`SchemeFetcher`] routes each scheme to its own fetcher:
//!
//! - remote: [`RemoteFetcher`], which reads through the [`DiskCache`]
//! - file: [`FileFetcher`]
//! - asset: [`AssetFetcher`], relative to a configured root
//! - resource: [`ResourceFetcher`], backed by an in-process table
//!
//! Remote bodies are single-use streams, so they are buffered in memory
//! while being written to the disk cache.

use bytes::Bytes;
use parking_lot::RwLock;
use quiver_cache::DiskCache;
use quiver_common::{ImageUri, Scheme};
use quiver_decode::{FetchError, RawBytesHandle};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Fetcher output.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub handle: RawBytesHandle,
    /// True when the bytes were served by the disk cache.
    pub from_disk_cache: bool,
}

impl Fetched {
    pub fn new(handle: RawBytesHandle) -> Self {
        Self {
            handle,
            from_disk_cache: false,
        }
    }
}

/// Produces source bytes for a URI. Called on worker threads.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, uri: &ImageUri) -> Result<Fetched, FetchError>;
}

/// Network transport for remote URIs.
///
/// Returns a single-use body stream; the caller buffers it.
pub trait Transport: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, FetchError>;
}

/// Transport used when none is configured; every remote request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransport;

impl Transport for NoTransport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, FetchError> {
        Err(FetchError::Unsupported(format!(
            "no network transport configured for {url}"
        )))
    }
}

/// Reads local files.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

impl FileFetcher {
    fn fetch_path(path: &Path) -> Result<Fetched, FetchError> {
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(FetchError::NotFound(format!(
                "{} is not a file",
                path.display()
            )));
        }
        Ok(Fetched::new(RawBytesHandle::file(path)))
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, uri: &ImageUri) -> Result<Fetched, FetchError> {
        Self::fetch_path(Path::new(uri.location()))
    }
}

/// Reads bundled assets below a root directory.
#[derive(Debug, Default, Clone)]
pub struct AssetFetcher {
    root: Option<PathBuf>,
}

impl AssetFetcher {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

impl Fetcher for AssetFetcher {
    fn fetch(&self, uri: &ImageUri) -> Result<Fetched, FetchError> {
        let root = self.root.as_ref().ok_or_else(|| {
            FetchError::Unsupported(format!("no asset root configured for {uri}"))
        })?;
        FileFetcher::fetch_path(&root.join(uri.location()))
    }
}

/// In-process table of resources addressed by id.
#[derive(Debug, Default)]
pub struct ResourceFetcher {
    resources: RwLock<HashMap<String, Bytes>>,
}

impl ResourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the bytes for `id`.
    pub fn register(&self, id: impl Into<String>, bytes: impl Into<Bytes>) {
        self.resources.write().insert(id.into(), bytes.into());
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.resources.write().remove(id).is_some()
    }
}

impl Fetcher for ResourceFetcher {
    fn fetch(&self, uri: &ImageUri) -> Result<Fetched, FetchError> {
        self.resources
            .read()
            .get(uri.location())
            .cloned()
            .map(|bytes| Fetched::new(RawBytesHandle::Buffered(bytes)))
            .ok_or_else(|| FetchError::NotFound(format!("no resource registered as {uri}")))
    }
}

/// Downloads remote URIs, reading through and populating the disk cache.
pub struct RemoteFetcher {
    transport: Arc<dyn Transport>,
    disk: Option<Arc<DiskCache>>,
}

impl RemoteFetcher {
    pub fn new(transport: Arc<dyn Transport>, disk: Option<Arc<DiskCache>>) -> Self {
        Self { transport, disk }
    }

    fn read_cached(&self, disk: &DiskCache, url: &str) -> Option<Bytes> {
        match disk.read(url) {
            Ok(Some(bytes)) => {
                trace!(url, len = bytes.len(), "disk cache hit");
                Some(Bytes::from(bytes))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(url, error = %e, "disk cache read failed, treating as miss");
                None
            }
        }
    }

    /// Buffer the body while teeing it into the disk cache.
    fn download(&self, url: &str) -> Result<Bytes, FetchError> {
        let mut body = self.transport.open(url)?;
        let mut writer = self.disk.as_deref().and_then(|disk| match disk.write(url) {
            Ok(writer) => Some(writer),
            Err(e) => {
                warn!(url, error = %e, "disk cache unavailable for write");
                None
            }
        });

        let mut buf = Vec::new();
        let mut chunk = [0u8; 16 * 1024];
        loop {
            let n = body
                .read(&mut chunk)
                .map_err(|e| FetchError::Network(format!("{url}: {e}")))?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let failed = match writer.as_mut() {
                Some(w) => w.write_all(&chunk[..n]).err(),
                None => None,
            };
            if let Some(e) = failed {
                warn!(url, error = %e, "disk cache write failed, continuing without it");
                writer = None;
            }
        }

        if let Some(w) = writer {
            match w.commit() {
                Ok(len) => debug!(url, len, "stored in disk cache"),
                Err(e) => warn!(url, error = %e, "disk cache commit failed"),
            }
        }
        Ok(Bytes::from(buf))
    }
}

impl Fetcher for RemoteFetcher {
    fn fetch(&self, uri: &ImageUri) -> Result<Fetched, FetchError> {
        let url = uri.as_str();
        if let Some(disk) = self.disk.as_deref() {
            if let Some(bytes) = self.read_cached(disk, url) {
                return Ok(Fetched {
                    handle: RawBytesHandle::Buffered(bytes),
                    from_disk_cache: true,
                });
            }
        }
        let bytes = self.download(url)?;
        Ok(Fetched::new(RawBytesHandle::Buffered(bytes)))
    }
}

/// Routes each URI to the fetcher for its scheme.
pub struct SchemeFetcher {
    pub remote: RemoteFetcher,
    pub file: FileFetcher,
    pub asset: AssetFetcher,
    pub resource: Arc<ResourceFetcher>,
}

impl Fetcher for SchemeFetcher {
    fn fetch(&self, uri: &ImageUri) -> Result<Fetched, FetchError> {
        match uri.scheme() {
            Scheme::Remote => self.remote.fetch(uri),
            Scheme::File => self.file.fetch(uri),
            Scheme::Asset => self.asset.fetch(uri),
            Scheme::Resource => self.resource.fetch(uri),
        }
    }
}
