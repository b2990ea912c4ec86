//! Persistent cache of raw source bytes, addressed by a digest of the URI.
//!
//! Layout: one `<sha256(uri)>.bin` file per entry directly under the cache
//! root. Writers stream into a uniquely named `.tmp` sibling and publish it
//! with an atomic rename in [`DiskWriter::commit`], so readers never observe
//! a partially written entry and a writer that fails or is dropped leaves
//! nothing behind under the final name. Several caches, in this process or
//! others, may share one root.
//!
//! The aggregate size is bounded; when a commit pushes the total over the
//! ceiling, [`DiskCache::sweep`] deletes whole files oldest-modified first.
//! Hits refresh the file's modification time, making it most recently used.

use crate::stats::DiskStats;
use crate::CacheError;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

const ENTRY_SUFFIX: &str = "bin";
const TEMP_SUFFIX: &str = "tmp";

/// Temp files untouched for this long belong to a writer that died.
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default)]
struct DiskState {
    /// Running estimate of committed bytes; re-measured by every sweep.
    bytes: u64,
    write_count: u64,
    eviction_count: u64,
}

/// Bounded on-disk byte cache.
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    ceiling_bytes: u64,
    state: Mutex<DiskState>,
    /// Serializes sweeps so two writers never race to delete the same files.
    sweep_lock: Mutex<()>,
}

/// A committed entry opened for reading.
#[derive(Debug)]
pub struct DiskEntry {
    file: File,
    path: PathBuf,
    len: u64,
}

impl DiskEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the whole entry into memory.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, CacheError> {
        let mut buf = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for DiskEntry {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// Sink for a new entry; invisible until [`DiskWriter::commit`].
#[derive(Debug)]
pub struct DiskWriter<'a> {
    cache: &'a DiskCache,
    /// Deleted on drop unless persisted.
    file: Option<NamedTempFile>,
    final_path: PathBuf,
    written: u64,
}

impl DiskCache {
    /// Open (creating if needed) a cache rooted at `root`.
    ///
    /// Temporary files older than an hour are left over from interrupted
    /// writers and are removed; younger ones may belong to a live writer.
    pub fn open(root: impl Into<PathBuf>, ceiling_bytes: u64) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        if !root.is_dir() {
            return Err(CacheError::InvalidRoot(root));
        }

        let cache = Self {
            root,
            ceiling_bytes,
            state: Mutex::new(DiskState::default()),
            sweep_lock: Mutex::new(()),
        };

        let mut bytes = 0;
        for entry in fs::read_dir(&cache.root)? {
            let entry = entry?;
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(TEMP_SUFFIX) => {
                    if is_stale_temp(&entry) {
                        debug!(path = %path.display(), "removing stale disk cache temp file");
                        let _ = fs::remove_file(&path);
                    }
                }
                Some(ENTRY_SUFFIX) => bytes += entry.metadata()?.len(),
                _ => {}
            }
        }
        cache.state.lock().bytes = bytes;
        debug!(root = %cache.root.display(), bytes, ceiling = ceiling_bytes, "disk cache opened");

        Ok(cache)
    }

    /// Stable hex digest used as the on-disk name for a URI.
    pub fn key_for(uri: &str) -> String {
        let digest = Sha256::digest(uri.as_bytes());
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(64);
        for &b in digest.iter() {
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        }
        out
    }

    /// Final path of the entry for a URI.
    pub fn path_for(&self, uri: &str) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_SUFFIX}", Self::key_for(uri)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    /// Open the committed entry for `uri`, marking it most recently used.
    ///
    /// The entry is opened read-only. Refreshing its modification time is
    /// best effort, so hits still work on a read-only cache root.
    pub fn open_entry(&self, uri: &str) -> Result<Option<DiskEntry>, CacheError> {
        let path = self.path_for(uri);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        touch(&path);
        let len = file.metadata()?.len();
        Ok(Some(DiskEntry { file, path, len }))
    }

    /// Whole entry for `uri`, if present.
    pub fn read(&self, uri: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.open_entry(uri)?.map(DiskEntry::into_bytes).transpose()
    }

    /// Start writing a new entry for `uri`.
    pub fn write(&self, uri: &str) -> Result<DiskWriter<'_>, CacheError> {
        let final_path = self.path_for(uri);
        let file = tempfile::Builder::new()
            .prefix(&format!("{}.", Self::key_for(uri)))
            .suffix(&format!(".{TEMP_SUFFIX}"))
            .tempfile_in(&self.root)?;
        Ok(DiskWriter {
            cache: self,
            file: Some(file),
            final_path,
            written: 0,
        })
    }

    /// Write a complete entry in one call.
    pub fn store(&self, uri: &str, bytes: &[u8]) -> Result<u64, CacheError> {
        let mut writer = self.write(uri)?;
        writer.write_all(bytes)?;
        writer.commit()
    }

    /// Remove the entry for `uri`. Returns whether it existed.
    pub fn remove(&self, uri: &str) -> Result<bool, CacheError> {
        let path = self.path_for(uri);
        let len = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                let mut state = self.state.lock();
                state.bytes = state.bytes.saturating_sub(len);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every committed entry.
    pub fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.sweep_lock.lock();
        for (path, _, _) in self.list_entries()? {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.state.lock().bytes = 0;
        Ok(())
    }

    /// Evict least recently modified entries until the total fits the ceiling.
    ///
    /// Returns the number of files removed.
    pub fn sweep(&self) -> Result<usize, CacheError> {
        let _guard = self.sweep_lock.lock();

        let mut entries = self.list_entries()?;
        let mut total: u64 = entries.iter().map(|(_, len, _)| *len).sum();
        if total <= self.ceiling_bytes {
            self.state.lock().bytes = total;
            return Ok(0);
        }

        entries.sort_by_key(|(_, _, modified)| *modified);
        let mut removed = 0;
        for (path, len, _) in entries {
            if total <= self.ceiling_bytes {
                break;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    total -= len;
                    removed += 1;
                    trace!(path = %path.display(), len, "disk cache evicted entry");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => total -= len,
                Err(e) => warn!(path = %path.display(), error = %e, "disk cache eviction failed"),
            }
        }

        let mut state = self.state.lock();
        state.bytes = total;
        state.eviction_count += removed as u64;
        debug!(removed, bytes = total, ceiling = self.ceiling_bytes, "disk cache swept");
        Ok(removed)
    }

    /// Current statistics; counts entries on disk.
    pub fn stats(&self) -> Result<DiskStats, CacheError> {
        let entries = self.list_entries()?;
        let state = self.state.lock();
        Ok(DiskStats {
            entries: entries.len(),
            bytes: entries.iter().map(|(_, len, _)| *len).sum(),
            ceiling_bytes: self.ceiling_bytes,
            write_count: state.write_count,
            eviction_count: state.eviction_count,
        })
    }

    fn list_entries(&self) -> Result<Vec<(PathBuf, u64, SystemTime)>, CacheError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_SUFFIX) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                // Removed by a concurrent sweep.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            out.push((path, meta.len(), modified));
        }
        Ok(out)
    }

    fn on_commit(&self, replaced: u64, len: u64) -> Result<(), CacheError> {
        let over = {
            let mut state = self.state.lock();
            state.bytes = state.bytes.saturating_sub(replaced) + len;
            state.write_count += 1;
            state.bytes > self.ceiling_bytes
        };
        if over {
            self.sweep()?;
        }
        Ok(())
    }
}

fn is_stale_temp(entry: &fs::DirEntry) -> bool {
    entry
        .metadata()
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map_or(false, |age| age >= STALE_TEMP_AGE)
}

fn touch(path: &Path) {
    let refreshed = OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(SystemTime::now()));
    if let Err(e) = refreshed {
        trace!(path = %path.display(), error = %e, "could not refresh disk entry mtime");
    }
}

impl DiskWriter<'_> {
    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and atomically publish the entry under its final name.
    ///
    /// Returns the committed size in bytes. On error the partial entry is
    /// discarded.
    pub fn commit(mut self) -> Result<u64, CacheError> {
        let Some(mut file) = self.file.take() else {
            return Err(CacheError::Io(io::Error::new(
                io::ErrorKind::Other,
                "disk cache writer already finished",
            )));
        };
        file.flush()?;
        file.as_file().sync_all()?;

        let replaced = fs::metadata(&self.final_path).map(|m| m.len()).unwrap_or(0);
        file.persist(&self.final_path).map_err(|e| e.error)?;
        trace!(path = %self.final_path.display(), len = self.written, "disk cache entry committed");

        self.cache.on_commit(replaced, self.written)?;
        Ok(self.written)
    }

    /// Discard the partial entry.
    pub fn abort(self) {}
}

impl Write for DiskWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "disk cache writer finished"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
