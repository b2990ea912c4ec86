//! Configuration types for the image engine.

use crate::errors::EngineError;
use crate::options::RequestOptions;
use quiver_common::{Size, SizeSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Complete engine configuration.
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Byte ceiling of the decoded-image memory cache.
    ///
    /// Defaults to an eighth of the memory available at startup, clamped to
    /// 16 MiB..=512 MiB, or 64 MiB when available memory cannot be read.
    #[serde(default = "default_memory_cache_ceiling_bytes")]
    pub memory_cache_ceiling_bytes: usize,
    /// Byte ceiling of the raw-bytes disk cache.
    #[serde(default = "default_disk_cache_ceiling_bytes")]
    pub disk_cache_ceiling_bytes: u64,
    /// Number of fetch/decode worker threads.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Bounds used when neither the request nor the target provides a size.
    #[serde(default = "default_size_spec")]
    pub default_size_spec: Size,
    /// Persist remote bytes on disk.
    #[serde(default = "default_true")]
    pub enable_disk_cache: bool,
    /// Log per-request decode diagnostics.
    #[serde(default)]
    pub debug_logging: bool,
    /// Disk cache directory; the platform cache dir when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_cache_root: Option<PathBuf>,
    /// Named request option presets (`[options.<name>]`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, RequestOptions>,
}

const MIN_MEMORY_CACHE_BYTES: u64 = 16 * 1024 * 1024;
const MAX_MEMORY_CACHE_BYTES: u64 = 512 * 1024 * 1024;
const FALLBACK_MEMORY_CACHE_BYTES: u64 = 64 * 1024 * 1024;

fn default_memory_cache_ceiling_bytes() -> usize {
    // mem_info reports KiB
    let bytes = sys_info::mem_info()
        .map(|m| memory_cache_share(m.avail.saturating_mul(1024)))
        .unwrap_or(FALLBACK_MEMORY_CACHE_BYTES);
    usize::try_from(bytes).unwrap_or(usize::MAX)
}

fn memory_cache_share(available: u64) -> u64 {
    (available / 8).clamp(MIN_MEMORY_CACHE_BYTES, MAX_MEMORY_CACHE_BYTES)
}

fn default_disk_cache_ceiling_bytes() -> u64 {
    128 * 1024 * 1024 // 128 MiB
}

fn default_worker_pool_size() -> usize {
    (num_cpus::get() * 2).clamp(2, 16)
}

fn default_size_spec() -> Size {
    Size::new(1920, 1080)
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_cache_ceiling_bytes: default_memory_cache_ceiling_bytes(),
            disk_cache_ceiling_bytes: default_disk_cache_ceiling_bytes(),
            worker_pool_size: default_worker_pool_size(),
            default_size_spec: default_size_spec(),
            enable_disk_cache: default_true(),
            debug_logging: false,
            disk_cache_root: None,
            options: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.memory_cache_ceiling_bytes == 0 {
            return Err(EngineError::Config(
                "memory_cache_ceiling_bytes must be at least 1".to_string(),
            ));
        }

        if self.worker_pool_size == 0 {
            return Err(EngineError::Config(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }

        if !self.default_size_spec.is_positive() {
            return Err(EngineError::Config(format!(
                "default_size_spec must be positive, got {}",
                self.default_size_spec
            )));
        }

        if self.enable_disk_cache && self.disk_cache_ceiling_bytes == 0 {
            return Err(EngineError::Config(
                "disk_cache_ceiling_bytes cannot be 0 when the disk cache is enabled".to_string(),
            ));
        }

        if let Some(root) = &self.disk_cache_root {
            if root.as_os_str().is_empty() {
                return Err(EngineError::Config(
                    "disk_cache_root cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// The fallback size as a [`SizeSpec`].
    #[must_use]
    pub fn default_size(&self) -> SizeSpec {
        SizeSpec::from(Some(self.default_size_spec))
    }

    /// Directory the disk cache lives in.
    #[must_use]
    pub fn resolved_disk_cache_root(&self) -> PathBuf {
        if let Some(root) = &self.disk_cache_root {
            return root.clone();
        }
        directories::ProjectDirs::from("org", "quiver", "quiver")
            .map(|dirs| dirs.cache_dir().join("images"))
            .unwrap_or_else(|| std::env::temp_dir().join("quiver-images"))
    }
}

/// Builder for creating an `EngineConfig`.
#[derive(Default)]
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    /// Sets the memory cache ceiling in bytes.
    #[must_use]
    pub fn memory_cache_ceiling_bytes(mut self, bytes: usize) -> Self {
        self.config.memory_cache_ceiling_bytes = bytes;
        self
    }

    /// Sets the disk cache ceiling in bytes.
    #[must_use]
    pub fn disk_cache_ceiling_bytes(mut self, bytes: u64) -> Self {
        self.config.disk_cache_ceiling_bytes = bytes;
        self
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn worker_pool_size(mut self, workers: usize) -> Self {
        self.config.worker_pool_size = workers;
        self
    }

    /// Sets the fallback decode bounds.
    #[must_use]
    pub fn default_size_spec(mut self, width: u32, height: u32) -> Self {
        self.config.default_size_spec = Size::new(width, height);
        self
    }

    /// Enables or disables the disk cache.
    #[must_use]
    pub fn enable_disk_cache(mut self, enabled: bool) -> Self {
        self.config.enable_disk_cache = enabled;
        self
    }

    /// Sets the disk cache directory.
    #[must_use]
    pub fn disk_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.disk_cache_root = Some(root.into());
        self
    }

    /// Enables per-request decode diagnostics.
    #[must_use]
    pub fn debug_logging(mut self, enabled: bool) -> Self {
        self.config.debug_logging = enabled;
        self
    }

    /// Adds a named request option preset.
    #[must_use]
    pub fn preset(mut self, name: impl Into<String>, options: RequestOptions) -> Self {
        self.config.options.insert(name.into(), options);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<EngineConfig, EngineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
