//! Named request option presets.

use crate::target::Transition;
use parking_lot::RwLock;
use quiver_common::{Size, SizeSpec};
use quiver_decode::DecodeOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-request settings that can be stored under a name and reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Explicit decode bounds; falls back to the target's size hint when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(default)]
    pub decode: DecodeOptions,
    #[serde(default)]
    pub transition: Transition,
}

impl RequestOptions {
    /// Explicit size spec, if one was configured.
    pub fn size_spec(&self) -> Option<SizeSpec> {
        self.size.map(|s| SizeSpec::from(Some(s)))
    }
}

/// Engine-owned table of option presets keyed by caller-chosen names.
#[derive(Debug, Default)]
pub struct OptionsRegistry {
    presets: RwLock<BTreeMap<String, RequestOptions>>,
}

impl OptionsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `presets`.
    pub fn with_presets(presets: BTreeMap<String, RequestOptions>) -> Self {
        Self {
            presets: RwLock::new(presets),
        }
    }

    /// Store a preset, returning the one it replaced.
    pub fn put(&self, name: impl Into<String>, options: RequestOptions) -> Option<RequestOptions> {
        self.presets.write().insert(name.into(), options)
    }

    pub fn get(&self, name: &str) -> Option<RequestOptions> {
        self.presets.read().get(name).copied()
    }

    pub fn remove(&self, name: &str) -> Option<RequestOptions> {
        self.presets.write().remove(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.presets.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.presets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.read().is_empty()
    }
}
