#![allow(dead_code)]

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use parking_lot::{Condvar, Mutex};
use quiver_decode::{FetchError, RawBytesHandle};
use quiver_engine::{
    DecodedImage, DisplayListener, DisplayTarget, Engine, EngineConfig, Fetched, Fetcher,
    ImageUri, LoadError, LoadedFrom, SizeHint, TargetId, Transition,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 0x80])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn test_config(workers: usize) -> EngineConfig {
    EngineConfig::builder()
        .enable_disk_cache(false)
        .worker_pool_size(workers)
        .build()
        .unwrap()
}

/// Blocks fetches until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }
}

/// Serves `resource://<id>` from a table and counts calls per id.
#[derive(Default)]
pub struct CountingFetcher {
    resources: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl CountingFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, id: &str, bytes: Vec<u8>) {
        self.resources.lock().insert(id.to_string(), bytes);
    }

    pub fn gate_with(&self, gate: Arc<Gate>) {
        *self.gate.lock() = Some(gate);
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls.lock().get(id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl Fetcher for CountingFetcher {
    fn fetch(&self, uri: &ImageUri) -> Result<Fetched, FetchError> {
        let id = uri.location().to_string();
        *self.calls.lock().entry(id.clone()).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.wait();
        }
        match self.resources.lock().get(&id) {
            Some(bytes) => Ok(Fetched::new(RawBytesHandle::buffered(bytes.clone()))),
            None => Err(FetchError::NotFound(id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shown {
    Placeholder,
    Image {
        width: u32,
        height: u32,
        transition: Transition,
    },
    Failure(LoadError),
}

/// Records every call the engine makes on it.
pub struct RecordingTarget {
    id: TargetId,
    hint: SizeHint,
    pub shown: Mutex<Vec<Shown>>,
}

impl RecordingTarget {
    pub fn new(hint: SizeHint) -> Arc<Self> {
        Arc::new(Self {
            id: TargetId::next(),
            hint,
            shown: Mutex::new(Vec::new()),
        })
    }

    pub fn shown(&self) -> Vec<Shown> {
        self.shown.lock().clone()
    }

    /// Last image or failure applied, ignoring placeholders.
    pub fn last_result(&self) -> Option<Shown> {
        self.shown
            .lock()
            .iter()
            .rev()
            .find(|s| **s != Shown::Placeholder)
            .cloned()
    }
}

impl DisplayTarget for RecordingTarget {
    fn id(&self) -> TargetId {
        self.id
    }

    fn size_hint(&self) -> SizeHint {
        self.hint
    }

    fn apply(&self, image: Arc<DecodedImage>, transition: Transition) {
        self.shown.lock().push(Shown::Image {
            width: image.width(),
            height: image.height(),
            transition,
        });
    }

    fn apply_placeholder(&self) {
        self.shown.lock().push(Shown::Placeholder);
    }

    fn apply_failure(&self, error: &LoadError) {
        self.shown.lock().push(Shown::Failure(error.clone()));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started(String),
    Complete(String, LoadedFrom),
    Failed(String),
    Cancelled(String),
}

#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl DisplayListener for RecordingListener {
    fn on_started(&self, uri: &str) {
        self.events.lock().push(Event::Started(uri.to_string()));
    }

    fn on_complete(&self, uri: &str, _image: &Arc<DecodedImage>, from: LoadedFrom) {
        self.events.lock().push(Event::Complete(uri.to_string(), from));
    }

    fn on_failed(&self, uri: &str, _error: &LoadError) {
        self.events.lock().push(Event::Failed(uri.to_string()));
    }

    fn on_cancelled(&self, uri: &str) {
        self.events.lock().push(Event::Cancelled(uri.to_string()));
    }
}

/// Poll `cond` until it holds or a few seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub fn engine_with(fetcher: &Arc<CountingFetcher>, workers: usize) -> Engine {
    Engine::builder(test_config(workers))
        .fetcher(Arc::clone(fetcher) as Arc<dyn Fetcher>)
        .build()
        .unwrap()
}
