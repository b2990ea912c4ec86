//! The engine object: caches, registries, worker pool and delivery thread.

use crate::binder::{Binding, DisplayBinder};
use crate::config::EngineConfig;
use crate::dispatcher::{DeliveryQueue, Job, WorkerPool};
use crate::errors::{EngineError, LoadError};
use crate::fetch::{
    AssetFetcher, FileFetcher, Fetcher, NoTransport, RemoteFetcher, ResourceFetcher, SchemeFetcher,
    Transport,
};
use crate::key::RequestKey;
use crate::options::OptionsRegistry;
use crate::registry::{Submission, TaskRegistry, Waiter};
use crate::request::{DisplayHelper, DownloadHelper, LoadHelper};
use crate::target::{DisplayTarget, LoadedFrom};
use bytes::Bytes;
use quiver_cache::{CacheStats, DiskCache, DiskStats, MemoryCache, PutOutcome};
use quiver_common::ImageUri;
use quiver_decode::{DecodedImage, Decoder};
use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// A decoded image and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub image: Arc<DecodedImage>,
    pub from: LoadedFrom,
}

/// Result fanned out to every waiter of an image request.
pub type ImageResult = Result<Loaded, LoadError>;

/// Result fanned out to every waiter of a download.
pub type DownloadResult = Result<Bytes, LoadError>;

pub(crate) type ImageRegistry = TaskRegistry<RequestKey, ImageResult>;
pub(crate) type DownloadRegistry = TaskRegistry<ImageUri, DownloadResult>;

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub memory: CacheStats,
    /// `None` when the disk cache is disabled or unreadable.
    pub disk: Option<DiskStats>,
    /// Image tasks currently running.
    pub in_flight: usize,
    /// Downloads currently running.
    pub downloads_in_flight: usize,
    /// Image tasks started since the engine was built.
    pub tasks_started: u64,
    /// Requests that joined an already running image task.
    pub tasks_joined: u64,
    pub workers: usize,
    /// Worker jobs finished since the engine was built.
    pub jobs_executed: u64,
    pub paused: bool,
}

/// State shared between the engine, worker jobs and request handles.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
    decoder: Decoder,
    pub(crate) memory: MemoryCache<RequestKey, DecodedImage>,
    pub(crate) disk: Option<Arc<DiskCache>>,
    pub(crate) images: Arc<ImageRegistry>,
    pub(crate) downloads: Arc<DownloadRegistry>,
    pub(crate) binder: Arc<DisplayBinder>,
    pub(crate) options: OptionsRegistry,
    pub(crate) resources: Arc<ResourceFetcher>,
    paused: AtomicBool,
    pub(crate) workers: WorkerPool,
    pub(crate) delivery: Arc<DeliveryQueue>,
}

impl Shared {
    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn lookup_memory(&self, key: &RequestKey) -> Option<ImageResult> {
        self.memory.get(key).map(|image| {
            Ok(Loaded {
                image,
                from: LoadedFrom::MemoryCache,
            })
        })
    }

    /// Answer from the memory cache, join a running task, or start one.
    ///
    /// While paused no new task is started.
    pub(crate) fn submit_image(
        self: &Arc<Self>,
        key: RequestKey,
        waiter: Waiter<ImageResult>,
    ) -> Submission<ImageResult> {
        let lookup = |k: &RequestKey| self.lookup_memory(k);
        let submission = if self.is_paused() {
            self.images.join(key.clone(), waiter, lookup)
        } else {
            self.images.submit(key.clone(), waiter, lookup)
        };
        match &submission {
            Submission::Started(_) => self.spawn_image_task(key),
            Submission::Joined(_) => trace!(key = %key, "joined running task"),
            Submission::Ready(..) => trace!(key = %key, "memory cache hit"),
            Submission::Refused(_) => debug!(key = %key, "paused, request not started"),
        }
        submission
    }

    pub(crate) fn submit_download(
        self: &Arc<Self>,
        uri: ImageUri,
        waiter: Waiter<DownloadResult>,
    ) -> Submission<DownloadResult> {
        let submission = if self.is_paused() {
            self.downloads.join(uri.clone(), waiter, |_| None)
        } else {
            self.downloads.submit(uri.clone(), waiter, |_| None)
        };
        if let Submission::Started(_) = submission {
            self.spawn_download_task(uri);
        }
        submission
    }

    fn spawn_image_task(self: &Arc<Self>, key: RequestKey) {
        let shared = Arc::clone(self);
        let task_key = key.clone();
        let job: Job = Box::new(move || shared.run_image_task(task_key));
        if self.workers.execute(job).is_err() {
            self.images.complete(&key, Err(LoadError::Shutdown));
        }
    }

    fn spawn_download_task(self: &Arc<Self>, uri: ImageUri) {
        let shared = Arc::clone(self);
        let task_uri = uri.clone();
        let job: Job = Box::new(move || shared.run_download_task(task_uri));
        if self.workers.execute(job).is_err() {
            self.downloads.complete(&uri, Err(LoadError::Shutdown));
        }
    }

    fn run_image_task(&self, key: RequestKey) {
        let result = catch_unwind(AssertUnwindSafe(|| self.produce_image(&key)))
            .unwrap_or_else(|payload| Err(LoadError::Panicked(panic_message(&*payload))));

        // Commit before completing so later submitters hit the cache.
        if let Ok(loaded) = &result {
            if self.memory.put(key.clone(), Arc::clone(&loaded.image)) == PutOutcome::Rejected {
                debug!(
                    key = %key,
                    bytes = loaded.image.byte_size(),
                    "image larger than the memory cache, delivered uncached"
                );
            }
        }
        let notified = self.images.complete(&key, result);
        trace!(key = %key, notified, "image task complete");
    }

    fn produce_image(&self, key: &RequestKey) -> ImageResult {
        let started = Instant::now();
        let result = self.fetch_and_decode(key);
        if self.config.debug_logging {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(loaded) => debug!(
                    uri = %key.uri,
                    source = %loaded.image.source_size(),
                    target = %key.size,
                    subsample = loaded.image.subsample(),
                    output = %loaded.image.size(),
                    from = %loaded.from,
                    elapsed_ms,
                    "decode diagnostics"
                ),
                Err(e) => warn!(uri = %key.uri, target = %key.size, elapsed_ms, error = %e, "load failed"),
            }
        }
        result
    }

    fn fetch_and_decode(&self, key: &RequestKey) -> ImageResult {
        let fetched = self.fetcher.fetch(&key.uri)?;
        let from = if fetched.from_disk_cache {
            LoadedFrom::DiskCache
        } else {
            LoadedFrom::Source
        };
        let image = self.decoder.decode(&fetched.handle, key.size, key.decode)?;
        Ok(Loaded {
            image: Arc::new(image),
            from,
        })
    }

    fn run_download_task(&self, uri: ImageUri) {
        let result = catch_unwind(AssertUnwindSafe(|| -> DownloadResult {
            let fetched = self.fetcher.fetch(&uri)?;
            Ok(fetched.handle.to_bytes()?)
        }))
        .unwrap_or_else(|payload| Err(LoadError::Panicked(panic_message(&*payload))));
        if let Err(e) = &result {
            if self.config.debug_logging {
                warn!(uri = %uri, error = %e, "download failed");
            }
        }
        self.downloads.complete(&uri, result);
    }

    /// Withdraw the registry waiter left behind by a dropped binding.
    pub(crate) fn withdraw(&self, binding: &Binding) {
        if let Some((key, waiter)) = binding.pending_waiter() {
            self.images.unregister(key, waiter);
        }
    }

    fn shutdown(&self) {
        if self.workers.is_shut_down() {
            return;
        }
        self.workers.shutdown();
        self.delivery.shutdown();
        info!("image engine shut down");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Builder for creating an [`Engine`].
///
/// # Examples
///
/// ```no_run
/// use quiver_engine::{Engine, EngineConfig};
///
/// let config = EngineConfig::builder().worker_pool_size(4).build()?;
/// let engine = Engine::builder(config)
///     .asset_root("/usr/share/myapp/assets")
///     .build()?;
/// # Ok::<(), quiver_engine::EngineError>(())
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    transport: Option<Arc<dyn Transport>>,
    asset_root: Option<PathBuf>,
    resources: Vec<(String, Bytes)>,
    decoder: Decoder,
}

impl EngineBuilder {
    /// Creates a new engine builder with the given configuration.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            fetcher: None,
            transport: None,
            asset_root: None,
            resources: Vec::new(),
            decoder: Decoder::new(),
        }
    }

    /// Replace scheme routing entirely with a custom fetcher.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Network transport for `http`/`https` URIs.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Directory `asset://` URIs are resolved against.
    #[must_use]
    pub fn asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(root.into());
        self
    }

    /// Register bytes served for `resource://<id>`.
    #[must_use]
    pub fn resource(mut self, id: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.resources.push((id.into(), bytes.into()));
        self
    }

    /// Use a differently configured decoder.
    #[must_use]
    pub fn decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Builds the engine and starts its threads.
    ///
    /// A disk cache that cannot be opened is logged and skipped; the engine
    /// then runs without one.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a thread cannot
    /// be spawned.
    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;
        let config = self.config;

        let disk = if config.enable_disk_cache {
            let root = config.resolved_disk_cache_root();
            match DiskCache::open(&root, config.disk_cache_ceiling_bytes) {
                Ok(disk) => Some(Arc::new(disk)),
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "disk cache unavailable, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        let resources = Arc::new(ResourceFetcher::new());
        for (id, bytes) in self.resources {
            resources.register(id, bytes);
        }

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                let transport = self
                    .transport
                    .unwrap_or_else(|| Arc::new(NoTransport) as Arc<dyn Transport>);
                Arc::new(SchemeFetcher {
                    remote: RemoteFetcher::new(transport, disk.clone()),
                    file: FileFetcher,
                    asset: AssetFetcher::new(self.asset_root),
                    resource: Arc::clone(&resources),
                })
            }
        };

        let workers = WorkerPool::new(config.worker_pool_size, "quiver-worker")?;
        let delivery = Arc::new(DeliveryQueue::new("quiver-delivery")?);

        info!(
            workers = workers.size(),
            memory_ceiling = config.memory_cache_ceiling_bytes,
            disk_cache = disk.is_some(),
            "image engine started"
        );

        let shared = Shared {
            memory: MemoryCache::new(config.memory_cache_ceiling_bytes),
            options: OptionsRegistry::with_presets(config.options.clone()),
            config,
            fetcher,
            decoder: self.decoder,
            disk,
            images: Arc::new(TaskRegistry::new()),
            downloads: Arc::new(TaskRegistry::new()),
            binder: Arc::new(DisplayBinder::new()),
            resources,
            paused: AtomicBool::new(false),
            workers,
            delivery,
        };
        Ok(Engine {
            shared: Arc::new(shared),
        })
    }
}

/// An image loading engine.
///
/// Owns the caches, the in-flight registries, the worker pool and the
/// delivery thread. Dropping the engine shuts it down: queued work is
/// finished and delivered, then all threads are joined.
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Build an engine with the default fetchers.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        EngineBuilder::new(config).build()
    }

    /// Creates a new engine builder.
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Start describing a request that shows `uri` on `target`.
    pub fn display<T: DisplayTarget + 'static>(
        &self,
        uri: impl Into<String>,
        target: &Arc<T>,
    ) -> DisplayHelper<'_> {
        let target: Arc<dyn DisplayTarget> = Arc::clone(target) as Arc<dyn DisplayTarget>;
        DisplayHelper::new(&self.shared, uri.into(), target)
    }

    /// Start describing a decode without a display target.
    pub fn load(&self, uri: impl Into<String>) -> LoadHelper<'_> {
        LoadHelper::new(&self.shared, uri.into())
    }

    /// Start describing a raw byte download.
    pub fn download(&self, uri: impl Into<String>) -> DownloadHelper<'_> {
        DownloadHelper::new(&self.shared, uri.into())
    }

    /// Drop whatever `target` is waiting for. Returns whether it had a binding.
    ///
    /// No callbacks are delivered for the cancelled request.
    pub fn cancel<T: DisplayTarget + ?Sized>(&self, target: &T) -> bool {
        match self.shared.binder.release(target.id()) {
            Some(binding) => {
                self.shared.withdraw(&binding);
                true
            }
            None => false,
        }
    }

    /// Stop starting new work. Cached images are still delivered.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        debug!("image engine paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        debug!("image engine resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Named request option presets.
    pub fn options(&self) -> &OptionsRegistry {
        &self.shared.options
    }

    /// Resource table behind `resource://` URIs (default fetchers only).
    pub fn resources(&self) -> &ResourceFetcher {
        &self.shared.resources
    }

    pub fn memory_cache(&self) -> &MemoryCache<RequestKey, DecodedImage> {
        &self.shared.memory
    }

    pub fn disk_cache(&self) -> Option<&DiskCache> {
        self.shared.disk.as_deref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Binder used to guard deliveries; exposed for inspection.
    pub fn binder(&self) -> &DisplayBinder {
        &self.shared.binder
    }

    pub fn clear_memory_cache(&self) {
        self.shared.memory.clear();
    }

    /// Delete every disk cache entry.
    pub fn clear_disk_cache(&self) -> Result<(), EngineError> {
        if let Some(disk) = &self.shared.disk {
            disk.clear()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let shared = &self.shared;
        let disk = shared.disk.as_ref().and_then(|disk| match disk.stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "could not read disk cache statistics");
                None
            }
        });
        EngineStats {
            memory: shared.memory.stats(),
            disk,
            in_flight: shared.images.in_flight(),
            downloads_in_flight: shared.downloads.in_flight(),
            tasks_started: shared.images.started_count(),
            tasks_joined: shared.images.joined_count(),
            workers: shared.workers.size(),
            jobs_executed: shared.workers.executed(),
            paused: shared.is_paused(),
        }
    }

    /// Block until no work is queued or running and every resulting
    /// delivery has run.
    ///
    /// Returns immediately when called from a worker or the delivery thread.
    pub fn flush(&self) {
        let shared = &self.shared;
        if shared.workers.is_worker_thread() || shared.delivery.is_delivery_thread() {
            return;
        }
        loop {
            shared.workers.wait_idle();
            shared.delivery.flush();
            // Delivery callbacks may have issued new requests.
            if shared.workers.pending() == 0 {
                break;
            }
        }
    }

    /// Finish queued work, deliver it, and join all threads.
    pub fn shutdown(self) {
        self.shared.shutdown();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }

    #[test]
    fn test_build_and_shutdown_without_disk_cache() {
        let config = EngineConfig::builder()
            .enable_disk_cache(false)
            .worker_pool_size(2)
            .build()
            .unwrap();
        let engine = Engine::new(config).unwrap();
        assert!(engine.disk_cache().is_none());
        let stats = engine.stats();
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.in_flight, 0);
        assert!(!stats.paused);
        engine.shutdown();
    }

    #[test]
    fn test_unusable_disk_root_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let config = EngineConfig::builder()
            .disk_cache_root(&file)
            .worker_pool_size(1)
            .build()
            .unwrap();
        let engine = Engine::new(config).unwrap();
        assert!(engine.disk_cache().is_none());
        assert!(engine.clear_disk_cache().is_ok());
    }
}
