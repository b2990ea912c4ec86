//! Cache statistics for monitoring and debugging.

use serde::Serialize;

/// Memory cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of resident entries.
    pub entries: usize,

    /// Resident size in bytes.
    pub bytes: usize,

    /// Configured ceiling in bytes.
    pub ceiling_bytes: usize,

    /// Total number of cache hits.
    pub hit_count: u64,

    /// Total number of cache misses.
    pub miss_count: u64,

    /// Entries evicted to make room.
    pub eviction_count: u64,

    /// Entries refused because they alone exceed the ceiling.
    pub rejection_count: u64,
}

impl CacheStats {
    /// Get the total number of cache accesses.
    pub fn total_accesses(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    /// Cache hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }

    /// Get cache utilization as a fraction of the ceiling (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.ceiling_bytes == 0 {
            0.0
        } else {
            self.bytes as f64 / self.ceiling_bytes as f64
        }
    }

    /// One-line summary, e.g. `memory: 3 entries, 1.500 MiB / 64.000 MiB, 75.0% hits`.
    pub fn format_summary(&self, label: &str) -> String {
        format!(
            "{}: {} entries, {} / {}, {:.1}% hits, {} evicted",
            label,
            self.entries,
            human_bytes(self.bytes as u64),
            human_bytes(self.ceiling_bytes as u64),
            self.hit_rate() * 100.0,
            self.eviction_count,
        )
    }
}

/// Disk cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskStats {
    /// Committed entries on disk.
    pub entries: usize,
    /// Bytes used by committed entries.
    pub bytes: u64,
    /// Configured ceiling in bytes.
    pub ceiling_bytes: u64,
    /// Entries committed since the cache was opened.
    pub write_count: u64,
    /// Files removed by LRU sweeps since the cache was opened.
    pub eviction_count: u64,
}

impl DiskStats {
    pub fn format_summary(&self, label: &str) -> String {
        format!(
            "{}: {} entries, {} / {}, {} written, {} evicted",
            label,
            self.entries,
            human_bytes(self.bytes),
            human_bytes(self.ceiling_bytes),
            self.write_count,
            self.eviction_count,
        )
    }
}

/// Simple IEC-style byte formatter (bytes, KiB, MiB, GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GIB {
        format!("{:.3} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.3} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.3} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}
