//! Display targets, transitions and request listeners.
//!
//! Every method in this module is invoked on the engine's single delivery
//! thread, never on a worker.

use crate::errors::LoadError;
use bytes::Bytes;
use quiver_common::SizeHint;
use quiver_decode::DecodedImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque identity of a display target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// How a delivered image is put on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// Swap in without animation.
    #[default]
    Immediate,
    /// Fade from transparent.
    FadeIn { duration_ms: u32 },
    /// Grow from the centre.
    ZoomIn { duration_ms: u32 },
}

impl Transition {
    /// Animation length in milliseconds; zero for [`Transition::Immediate`].
    pub const fn duration_ms(self) -> u32 {
        match self {
            Self::Immediate => 0,
            Self::FadeIn { duration_ms } | Self::ZoomIn { duration_ms } => duration_ms,
        }
    }
}

/// Where a delivered image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadedFrom {
    MemoryCache,
    DiskCache,
    Source,
}

impl fmt::Display for LoadedFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory cache"),
            Self::DiskCache => write!(f, "disk cache"),
            Self::Source => write!(f, "source"),
        }
    }
}

/// Something that shows images.
///
/// The engine only ever holds a weak reference to a target; dropping the
/// last strong reference silently cancels its pending delivery.
pub trait DisplayTarget: Send + Sync {
    /// Stable identity used to detect reassignment.
    fn id(&self) -> TargetId;

    /// Geometry used to pick the decode size when the request does not set one.
    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }

    /// Show a decoded image.
    fn apply(&self, image: Arc<DecodedImage>, transition: Transition);

    /// Show the "loading" state.
    fn apply_placeholder(&self);

    /// Show the "failed" state.
    fn apply_failure(&self, error: &LoadError);
}

/// Progress callbacks for a display request. All methods default to no-ops.
pub trait DisplayListener: Send + Sync {
    fn on_started(&self, _uri: &str) {}

    fn on_complete(&self, _uri: &str, _image: &Arc<DecodedImage>, _from: LoadedFrom) {}

    fn on_failed(&self, _uri: &str, _error: &LoadError) {}

    /// The target was reassigned or dropped, or the engine is paused.
    fn on_cancelled(&self, _uri: &str) {}
}

/// Callbacks for a target-less decode.
pub trait LoadListener: Send + Sync {
    fn on_complete(&self, _uri: &str, _image: &Arc<DecodedImage>, _from: LoadedFrom) {}

    fn on_failed(&self, _uri: &str, _error: &LoadError) {}

    fn on_cancelled(&self, _uri: &str) {}
}

/// Callbacks for a raw byte download.
pub trait DownloadListener: Send + Sync {
    fn on_complete(&self, _uri: &str, _bytes: &Bytes) {}

    fn on_failed(&self, _uri: &str, _error: &LoadError) {}
}
