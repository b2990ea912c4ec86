//! Cache tiers for the quiver image loader.
//!
//! ## Architecture
//!
//! - [`LruIndex`]: key/size recency core with O(1) promote and evict
//! - [`MemoryCache`]: thread-safe, byte-bounded LRU of decoded images
//! - [`DiskCache`]: bounded, persistent store of raw remote bytes, keyed by a
//!   SHA-256 digest of the source URI, written via temp file + atomic rename
//!
//! ## Usage
//!
//! ```rust
//! use quiver_cache::MemoryCache;
//! use std::sync::Arc;
//!
//! let cache: MemoryCache<String, Vec<u8>> = MemoryCache::new(1024);
//! cache.put("a".to_string(), Arc::new(vec![0xFF; 64]));
//!
//! if let Some(hit) = cache.get(&"a".to_string()) {
//!     println!("Cache hit! {} bytes", hit.len());
//! }
//!
//! let stats = cache.stats();
//! println!("Hit rate: {:.1}%", stats.hit_rate() * 100.0);
//! ```

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub mod disk;
pub mod lru;
pub mod memory;
pub mod stats;

pub use disk::{DiskCache, DiskEntry, DiskWriter};
pub use lru::{Admission, LruIndex};
pub use memory::{MemoryCache, PutOutcome, Weighted};
pub use stats::{human_bytes, CacheStats, DiskStats};

/// Disk cache failures.
///
/// Callers treat these as a cache miss and carry on without the disk tier.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem operation failed.
    #[error("Disk cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// The cache root exists but is not a directory.
    #[error("Disk cache root is not a directory: {}", .0.display())]
    InvalidRoot(PathBuf),
}
