//! Fluent request helpers returned by [`Engine::display`], [`Engine::load`]
//! and [`Engine::download`], and the handles their `fire` methods return.
//!
//! [`Engine::display`]: crate::Engine::display
//! [`Engine::load`]: crate::Engine::load
//! [`Engine::download`]: crate::Engine::download

use crate::binder::DisplayBinder;
use crate::engine::{DownloadRegistry, DownloadResult, ImageRegistry, ImageResult, Shared};
use crate::errors::LoadError;
use crate::key::RequestKey;
use crate::options::RequestOptions;
use crate::registry::{Submission, Waiter, WaiterId};
use crate::target::{
    DisplayListener, DisplayTarget, DownloadListener, LoadListener, LoadedFrom, TargetId,
    Transition,
};
use quiver_common::{resolve_size, ImageUri, PixelLayout, SizeHint, SizeSpec};
use quiver_decode::DecodeOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{trace, warn};

/// Settings shared by display and load helpers before they are resolved.
#[derive(Default)]
struct Overrides {
    size: Option<SizeSpec>,
    decode: Option<DecodeOptions>,
    transition: Option<Transition>,
    preset: Option<String>,
}

impl Overrides {
    /// Merge explicit settings over the named preset.
    fn resolve(self, shared: &Shared) -> (Option<SizeSpec>, DecodeOptions, Transition) {
        let preset = self.preset.as_deref().and_then(|name| {
            let found = shared.options.get(name);
            if found.is_none() {
                warn!(preset = name, "unknown options preset, using defaults");
            }
            found
        });
        let base = preset.unwrap_or_default();
        let size = self.size.or_else(|| preset.and_then(|p| p.size_spec()));
        (
            size,
            self.decode.unwrap_or(base.decode),
            self.transition.unwrap_or(base.transition),
        )
    }
}

macro_rules! override_setters {
    () => {
        /// Decode to fit `width`×`height`. A zero axis means the original size.
        #[must_use]
        pub fn size(mut self, width: u32, height: u32) -> Self {
            self.overrides.size = Some(SizeSpec::bounded(width, height).unwrap_or_default());
            self
        }

        /// Decode at the source resolution regardless of target geometry.
        #[must_use]
        pub fn original_size(mut self) -> Self {
            self.overrides.size = Some(SizeSpec::Unspecified);
            self
        }

        #[must_use]
        pub fn decode(mut self, options: DecodeOptions) -> Self {
            self.overrides.decode = Some(options);
            self
        }

        #[must_use]
        pub fn layout(mut self, layout: PixelLayout) -> Self {
            self.overrides.decode = Some(DecodeOptions::with_layout(layout));
            self
        }

        /// Start from the named preset; explicit settings still win.
        #[must_use]
        pub fn options(mut self, preset: impl Into<String>) -> Self {
            self.overrides.preset = Some(preset.into());
            self
        }

        /// Apply every field of `options` as an explicit setting.
        #[must_use]
        pub fn with_options(mut self, options: RequestOptions) -> Self {
            self.overrides.size = options.size_spec().or(self.overrides.size);
            self.overrides.decode = Some(options.decode);
            self.overrides.transition = Some(options.transition);
            self
        }
    };
}

/// Builder for a request that shows an image on a [`DisplayTarget`].
#[must_use = "a display request does nothing until `fire` is called"]
pub struct DisplayHelper<'a> {
    shared: &'a Arc<Shared>,
    uri: String,
    target: Arc<dyn DisplayTarget>,
    overrides: Overrides,
    listener: Option<Arc<dyn DisplayListener>>,
}

impl<'a> DisplayHelper<'a> {
    pub(crate) fn new(shared: &'a Arc<Shared>, uri: String, target: Arc<dyn DisplayTarget>) -> Self {
        Self {
            shared,
            uri,
            target,
            overrides: Overrides::default(),
            listener: None,
        }
    }

    override_setters!();

    /// How the image is put on screen. Memory cache hits are always immediate.
    pub fn transition(mut self, transition: Transition) -> Self {
        self.overrides.transition = Some(transition);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn DisplayListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Bind the target to this request and start it.
    ///
    /// Any request the target was previously bound to is abandoned: its
    /// result, if it still arrives, is never applied.
    pub fn fire(self) -> DisplayHandle {
        let shared = self.shared;
        let target_id = self.target.id();
        let (explicit_size, decode, transition) = self.overrides.resolve(shared);

        let key = ImageUri::parse(&self.uri).map(|uri| {
            let fallback = shared.config.default_size();
            let size = resolve_size(explicit_size, self.target.size_hint(), fallback);
            RequestKey::new(uri, size, decode)
        });

        let (generation, previous) = shared.binder.bind(target_id, key.as_ref().ok().cloned());
        if let Some(previous) = previous {
            shared.withdraw(&previous);
        }

        let delivery = Delivery {
            binder: Arc::clone(&shared.binder),
            target: Arc::downgrade(&self.target),
            target_id,
            key: key.as_ref().ok().cloned(),
            generation,
            uri: Arc::from(self.uri.as_str()),
            listener: self.listener,
            transition,
        };

        delivery.post(shared, Delivery::started);

        let handle = DisplayHandle {
            target_id,
            generation,
            key: key.as_ref().ok().cloned(),
            binder: Arc::clone(&shared.binder),
            images: Arc::clone(&shared.images),
        };

        let key = match key {
            Ok(key) => key,
            Err(e) => {
                let error = LoadError::InvalidUri(e);
                delivery.post(shared, move |d| d.deliver(Err(error)));
                return handle;
            }
        };

        let waiter: Waiter<ImageResult> = {
            let delivery = delivery.clone();
            let queue = Arc::clone(&shared.delivery);
            Box::new(move |result| {
                queue.post(Box::new(move || delivery.deliver(result)));
            })
        };

        match shared.submit_image(key.clone(), waiter) {
            Submission::Ready(result, waiter) => waiter(result),
            Submission::Started(id) | Submission::Joined(id) => {
                if !shared.binder.attach_waiter(target_id, generation, id) {
                    shared.images.unregister(&key, id);
                }
                delivery.post(shared, Delivery::placeholder);
            }
            Submission::Refused(_) => delivery.post(shared, Delivery::paused),
        }
        handle
    }
}

/// Everything a delivery job needs to decide whether and how to apply.
#[derive(Clone)]
struct Delivery {
    binder: Arc<DisplayBinder>,
    target: Weak<dyn DisplayTarget>,
    target_id: TargetId,
    key: Option<RequestKey>,
    generation: u64,
    uri: Arc<str>,
    listener: Option<Arc<dyn DisplayListener>>,
    transition: Transition,
}

impl Delivery {
    fn post(&self, shared: &Shared, f: impl FnOnce(&Self) + Send + 'static) {
        let delivery = self.clone();
        shared.delivery.post(Box::new(move || f(&delivery)));
    }

    /// The live target, if this delivery still owns its binding.
    fn current_target(&self) -> Option<Arc<dyn DisplayTarget>> {
        let Some(target) = self.target.upgrade() else {
            self.binder.release_if(self.target_id, self.generation);
            return None;
        };
        self.binder
            .is_current(self.target_id, self.key.as_ref(), self.generation)
            .then_some(target)
    }

    /// Claim the binding for this delivery and return the live target.
    ///
    /// The binding is released even when the target has been dropped.
    fn take_target(&self) -> Option<Arc<dyn DisplayTarget>> {
        let taken = self
            .binder
            .take_if_current(self.target_id, self.key.as_ref(), self.generation)
            .is_some();
        self.target.upgrade().filter(|_| taken)
    }

    fn started(&self) {
        if let Some(listener) = &self.listener {
            listener.on_started(&self.uri);
        }
    }

    fn placeholder(&self) {
        if let Some(target) = self.current_target() {
            target.apply_placeholder();
        }
    }

    fn paused(&self) {
        if let Some(target) = self.take_target() {
            target.apply_placeholder();
        }
        self.cancelled();
    }

    fn cancelled(&self) {
        if let Some(listener) = &self.listener {
            listener.on_cancelled(&self.uri);
        }
    }

    fn deliver(&self, result: ImageResult) {
        let Some(target) = self.take_target() else {
            trace!(uri = %self.uri, target = %self.target_id, "dropping defunct delivery");
            self.cancelled();
            return;
        };

        match result {
            Ok(loaded) => {
                let transition = match loaded.from {
                    LoadedFrom::MemoryCache => Transition::Immediate,
                    _ => self.transition,
                };
                target.apply(Arc::clone(&loaded.image), transition);
                if let Some(listener) = &self.listener {
                    listener.on_complete(&self.uri, &loaded.image, loaded.from);
                }
            }
            Err(error) => {
                target.apply_failure(&error);
                if let Some(listener) = &self.listener {
                    listener.on_failed(&self.uri, &error);
                }
            }
        }
    }
}

/// Handle to a fired display request.
#[derive(Clone)]
pub struct DisplayHandle {
    target_id: TargetId,
    generation: u64,
    key: Option<RequestKey>,
    binder: Arc<DisplayBinder>,
    images: Arc<ImageRegistry>,
}

impl DisplayHandle {
    /// Key of the request; `None` if the URI was rejected.
    pub fn key(&self) -> Option<&RequestKey> {
        self.key.as_ref()
    }

    pub fn target_id(&self) -> TargetId {
        self.target_id
    }

    /// Whether the target is still bound to this request and waiting.
    pub fn is_pending(&self) -> bool {
        self.binder
            .binding(self.target_id)
            .map_or(false, |b| b.generation == self.generation)
    }

    /// Abandon the request if the target is still bound to it.
    ///
    /// Returns false if the request was already delivered or superseded.
    pub fn cancel(&self) -> bool {
        match self.binder.release_if(self.target_id, self.generation) {
            Some(binding) => {
                if let Some((key, waiter)) = binding.pending_waiter() {
                    self.images.unregister(key, waiter);
                }
                true
            }
            None => false,
        }
    }
}

/// Builder for a decode that is handed back instead of displayed.
#[must_use = "a load request does nothing until `fire` is called"]
pub struct LoadHelper<'a> {
    shared: &'a Arc<Shared>,
    uri: String,
    overrides: Overrides,
    listener: Option<Arc<dyn LoadListener>>,
}

impl<'a> LoadHelper<'a> {
    pub(crate) fn new(shared: &'a Arc<Shared>, uri: String) -> Self {
        Self {
            shared,
            uri,
            overrides: Overrides::default(),
            listener: None,
        }
    }

    override_setters!();

    pub fn listener(mut self, listener: Arc<dyn LoadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Start the load. The result is delivered to the listener, if any, and
    /// through the returned handle.
    pub fn fire(self) -> LoadHandle {
        let shared = self.shared;
        let (explicit_size, decode, _) = self.overrides.resolve(shared);
        let (tx, rx) = flume::bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));

        let notify = {
            let uri: Arc<str> = Arc::from(self.uri.as_str());
            let listener = self.listener;
            let cancelled = Arc::clone(&cancelled);
            move |result: ImageResult| {
                if cancelled.load(Ordering::Acquire) {
                    if let Some(listener) = &listener {
                        listener.on_cancelled(&uri);
                    }
                    return;
                }
                if let Some(listener) = &listener {
                    match &result {
                        Ok(loaded) => listener.on_complete(&uri, &loaded.image, loaded.from),
                        Err(LoadError::Paused) => listener.on_cancelled(&uri),
                        Err(error) => listener.on_failed(&uri, error),
                    }
                }
                let _ = tx.send(result);
            }
        };

        let uri = match ImageUri::parse(&self.uri) {
            Ok(uri) => uri,
            Err(e) => {
                let error = LoadError::InvalidUri(e);
                shared.delivery.post(Box::new(move || notify(Err(error))));
                return LoadHandle::detached(rx, cancelled);
            }
        };
        let size = resolve_size(explicit_size, SizeHint::default(), shared.config.default_size());
        let key = RequestKey::new(uri, size, decode);

        let waiter: Waiter<ImageResult> = {
            let queue = Arc::clone(&shared.delivery);
            Box::new(move |result| {
                queue.post(Box::new(move || notify(result)));
            })
        };

        let registered = match shared.submit_image(key.clone(), waiter) {
            Submission::Ready(result, waiter) => {
                waiter(result);
                None
            }
            Submission::Started(id) | Submission::Joined(id) => Some(id),
            Submission::Refused(waiter) => {
                waiter(Err(LoadError::Paused));
                None
            }
        };

        LoadHandle {
            rx,
            cancelled,
            registration: registered.map(|id| (Arc::clone(&shared.images), key, id)),
        }
    }
}

/// Handle to a fired load.
pub struct LoadHandle {
    rx: flume::Receiver<ImageResult>,
    cancelled: Arc<AtomicBool>,
    registration: Option<(Arc<ImageRegistry>, RequestKey, WaiterId)>,
}

impl LoadHandle {
    fn detached(rx: flume::Receiver<ImageResult>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            rx,
            cancelled,
            registration: None,
        }
    }

    /// Key of the request; `None` if the URI was rejected.
    pub fn key(&self) -> Option<&RequestKey> {
        self.registration.as_ref().map(|(_, key, _)| key)
    }

    /// Stop waiting. The shared task keeps running for other waiters.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some((images, key, waiter)) = &self.registration {
            images.unregister(key, *waiter);
        }
    }

    fn closed(&self) -> LoadError {
        if self.cancelled.load(Ordering::Acquire) {
            LoadError::Cancelled
        } else {
            LoadError::Shutdown
        }
    }

    /// Block until the result arrives.
    pub fn wait(self) -> ImageResult {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(self.closed()),
        }
    }

    /// Block for at most `timeout`; `None` if nothing arrived in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ImageResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(flume::RecvTimeoutError::Timeout) => None,
            Err(flume::RecvTimeoutError::Disconnected) => Some(Err(self.closed())),
        }
    }

    /// Await the result from async code.
    pub async fn recv_async(self) -> ImageResult {
        match self.rx.recv_async().await {
            Ok(result) => result,
            Err(_) => Err(self.closed()),
        }
    }
}

/// Builder for a raw byte download.
#[must_use = "a download does nothing until `fire` is called"]
pub struct DownloadHelper<'a> {
    shared: &'a Arc<Shared>,
    uri: String,
    listener: Option<Arc<dyn DownloadListener>>,
}

impl<'a> DownloadHelper<'a> {
    pub(crate) fn new(shared: &'a Arc<Shared>, uri: String) -> Self {
        Self {
            shared,
            uri,
            listener: None,
        }
    }

    pub fn listener(mut self, listener: Arc<dyn DownloadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Start the download. Concurrent downloads of one URI share a fetch.
    pub fn fire(self) -> DownloadHandle {
        let shared = self.shared;
        let (tx, rx) = flume::bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));

        let notify = {
            let uri: Arc<str> = Arc::from(self.uri.as_str());
            let listener = self.listener;
            let cancelled = Arc::clone(&cancelled);
            move |result: DownloadResult| {
                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                if let Some(listener) = &listener {
                    match &result {
                        Ok(bytes) => listener.on_complete(&uri, bytes),
                        Err(error) => listener.on_failed(&uri, error),
                    }
                }
                let _ = tx.send(result);
            }
        };

        let uri = match ImageUri::parse(&self.uri) {
            Ok(uri) => uri,
            Err(e) => {
                let error = LoadError::InvalidUri(e);
                shared.delivery.post(Box::new(move || notify(Err(error))));
                return DownloadHandle {
                    rx,
                    cancelled,
                    registration: None,
                };
            }
        };

        let waiter: Waiter<DownloadResult> = {
            let queue = Arc::clone(&shared.delivery);
            Box::new(move |result| {
                queue.post(Box::new(move || notify(result)));
            })
        };

        let registered = match shared.submit_download(uri.clone(), waiter) {
            Submission::Started(id) | Submission::Joined(id) => Some(id),
            Submission::Ready(result, waiter) => {
                waiter(result);
                None
            }
            Submission::Refused(waiter) => {
                waiter(Err(LoadError::Paused));
                None
            }
        };

        DownloadHandle {
            rx,
            cancelled,
            registration: registered.map(|id| (Arc::clone(&shared.downloads), uri, id)),
        }
    }
}

/// Handle to a fired download.
pub struct DownloadHandle {
    rx: flume::Receiver<DownloadResult>,
    cancelled: Arc<AtomicBool>,
    registration: Option<(Arc<DownloadRegistry>, ImageUri, WaiterId)>,
}

impl DownloadHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some((downloads, uri, waiter)) = &self.registration {
            downloads.unregister(uri, *waiter);
        }
    }

    fn closed(&self) -> LoadError {
        if self.cancelled.load(Ordering::Acquire) {
            LoadError::Cancelled
        } else {
            LoadError::Shutdown
        }
    }

    pub fn wait(self) -> DownloadResult {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(self.closed()),
        }
    }

    pub async fn recv_async(self) -> DownloadResult {
        match self.rx.recv_async().await {
            Ok(result) => result,
            Err(_) => Err(self.closed()),
        }
    }
}
