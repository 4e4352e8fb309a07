use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use super::file_cache::FileCache;
use super::types::{CacheEntry, Clock, SystemClock, TtlPolicy};
use crate::constants::{DEFAULT_MEMORY_CACHE_LIMIT, DEFAULT_SWEEP_INTERVAL_SECS};

/// Orphaned temp files younger than this may belong to an in-flight write
const ORPHAN_GRACE: Duration = Duration::from_secs(60);

/// Construction parameters for [`CacheManager`]
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Disk tier directory; `None` runs memory-only
    pub directory: Option<PathBuf>,
    /// Maximum number of entries held in memory
    pub memory_limit: usize,
    /// Background purge interval; zero disables the sweeper
    pub sweep_interval: Duration,
    /// Per-type TTL overrides in days
    pub ttl_overrides: BTreeMap<String, u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: None,
            memory_limit: DEFAULT_MEMORY_CACHE_LIMIT,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            ttl_overrides: BTreeMap::new(),
        }
    }
}

/// Two-tier (memory + disk) TTL cache with LRU eviction of the memory tier
#[derive(Debug)]
pub struct CacheManager {
    inner: Arc<CacheInner>,
    sweeper: Mutex<Option<Sweeper>>,
}

#[derive(Debug)]
struct CacheInner {
    memory: Mutex<MemoryCache>,
    disk: Option<FileCache>,
    ttl: TtlPolicy,
    memory_limit: usize,
    clock: Arc<dyn Clock>,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

/// In-memory tier
#[derive(Debug, Default)]
struct MemoryCache {
    entries: HashMap<String, MemoryEntry>,
    /// Monotonic access counter used as the LRU stamp
    tick: u64,
    hits: usize,
    misses: usize,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    data_type: String,
    timestamp: DateTime<Utc>,
    last_access: u64,
}

impl MemoryCache {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn insert(&mut self, key: String, value: Value, data_type: &str, timestamp: DateTime<Utc>) {
        let last_access = self.next_tick();
        self.entries.insert(
            key,
            MemoryEntry {
                value,
                data_type: data_type.to_string(),
                timestamp,
                last_access,
            },
        );
    }

    /// Bring a disk entry into memory. A value written while the disk read
    /// was in flight wins over the older disk copy.
    fn promote(&mut self, key: &str, entry: CacheEntry, limit: usize) -> Value {
        let tick = self.next_tick();
        if let Some(current) = self.entries.get_mut(key) {
            current.last_access = tick;
            return current.value.clone();
        }
        self.insert(key.to_string(), entry.data.clone(), &entry.data_type, entry.timestamp);
        self.evict_to(limit);
        debug!(key, "disk cache hit, promoted to memory");
        entry.data
    }

    /// Drop least-recently-accessed entries until at most `limit` remain
    fn evict_to(&mut self, limit: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > limit {
            let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            self.entries.remove(&victim);
            evicted += 1;
        }
        evicted
    }
}

impl CacheManager {
    /// Create a cache manager on the system clock
    pub fn new(settings: CacheSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Create a cache manager with an explicit time source
    ///
    /// An unusable cache directory is not fatal: the manager logs and
    /// runs memory-only.
    pub fn with_clock(settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        let disk = settings.directory.as_ref().and_then(|dir| {
            match FileCache::new(dir.clone()) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cache directory unavailable, running memory-only");
                    None
                }
            }
        });

        let inner = Arc::new(CacheInner {
            memory: Mutex::new(MemoryCache::default()),
            disk,
            ttl: TtlPolicy::with_overrides(&settings.ttl_overrides),
            memory_limit: settings.memory_limit,
            clock,
            last_sweep: Mutex::new(None),
        });

        let sweeper = if settings.sweep_interval.is_zero() {
            None
        } else {
            Sweeper::spawn(Arc::clone(&inner), settings.sweep_interval)
        };

        Self {
            inner,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Look up a value, serving only entries younger than `ttl(data_type)`
    pub fn get(&self, key: &str, data_type: &str) -> Option<Value> {
        self.inner.get(key, data_type)
    }

    /// Store a value in both tiers. Disk failures are logged, not returned.
    pub fn set(&self, key: &str, value: Value, data_type: &str) {
        self.inner.set(key, value, data_type)
    }

    /// Typed lookup; a value that no longer deserializes counts as a miss
    pub fn get_as<T: DeserializeOwned>(&self, key: &str, data_type: &str) -> Option<T> {
        let value = self.get(key, data_type)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                debug!(key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Typed store
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T, data_type: &str) {
        match serde_json::to_value(value) {
            Ok(json) => self.set(key, json, data_type),
            Err(e) => warn!(key, error = %e, "failed to serialize value for cache"),
        }
    }

    /// Remove a key from both tiers; returns whether anything was found
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.invalidate(key)
    }

    /// Remove every entry, or only entries of one data type.
    /// Returns the number of entries removed across both tiers.
    pub fn clear(&self, data_type: Option<&str>) -> usize {
        self.inner.clear(data_type)
    }

    /// Remove every expired entry from both tiers
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub fn get_stats(&self) -> CacheStats {
        self.inner.stats()
    }

    /// Stop the background sweeper. Idempotent.
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl CacheInner {
    fn get(&self, key: &str, data_type: &str) -> Option<Value> {
        let now = self.clock.now();

        {
            let mut mem = self.memory.lock();
            let tick = mem.next_tick();
            if let Some(entry) = mem.entries.get_mut(key) {
                if self.ttl.is_expired(entry.timestamp, data_type, now) {
                    mem.entries.remove(key);
                } else {
                    entry.last_access = tick;
                    let value = entry.value.clone();
                    mem.hits += 1;
                    debug!(key, "memory cache hit");
                    return Some(value);
                }
            }
        }

        let found = self.load_from_disk(key, data_type, now);

        let mut mem = self.memory.lock();
        match found {
            Some(entry) => {
                mem.hits += 1;
                Some(mem.promote(key, entry, self.memory_limit))
            }
            None => {
                mem.misses += 1;
                None
            }
        }
    }

    fn load_from_disk(&self, key: &str, data_type: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let disk = self.disk.as_ref()?;
        match disk.load(key) {
            Ok(Some(entry)) if self.ttl.is_expired(entry.timestamp, data_type, now) => {
                if let Err(e) = disk.remove(key) {
                    warn!(key, error = %e, "failed to remove expired cache file");
                }
                None
            }
            Ok(found) => found,
            Err(e) => {
                warn!(key, error = %e, "unreadable cache file, discarding");
                let _ = disk.remove(key);
                None
            }
        }
    }

    fn set(&self, key: &str, value: Value, data_type: &str) {
        let now = self.clock.now();

        if let Some(disk) = &self.disk {
            let entry = CacheEntry::new(value.clone(), data_type, now);
            if let Err(e) = disk.save(key, &entry) {
                warn!(key, error = %e, "failed to write cache file");
            }
        }

        let mut mem = self.memory.lock();
        mem.insert(key.to_string(), value, data_type, now);
        let evicted = mem.evict_to(self.memory_limit);
        if evicted > 0 {
            debug!(evicted, "evicted least-recently-used memory entries");
        }
    }

    fn invalidate(&self, key: &str) -> bool {
        let in_memory = self.memory.lock().entries.remove(key).is_some();
        let on_disk = match &self.disk {
            Some(disk) => disk.remove(key).unwrap_or_else(|e| {
                warn!(key, error = %e, "failed to remove cache file");
                false
            }),
            None => false,
        };
        in_memory || on_disk
    }

    fn clear(&self, data_type: Option<&str>) -> usize {
        let mut removed = {
            let mut mem = self.memory.lock();
            let before = mem.entries.len();
            match data_type {
                Some(t) => mem.entries.retain(|_, e| e.data_type != t),
                None => {
                    mem.entries.clear();
                    mem.hits = 0;
                    mem.misses = 0;
                }
            }
            before - mem.entries.len()
        };

        let Some(disk) = &self.disk else {
            return removed;
        };

        let files = match disk.entry_files() {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "failed to list cache directory");
                return removed;
            }
        };

        for path in files {
            let matches = match data_type {
                None => true,
                Some(t) => FileCache::read_path(&path)
                    .map(|entry| entry.data_type == t)
                    .unwrap_or(false),
            };
            if matches && FileCache::remove_path(&path).unwrap_or(false) {
                removed += 1;
            }
        }

        if data_type.is_none() {
            if let Ok(orphans) = disk.orphaned_temp_files() {
                for path in orphans {
                    let _ = FileCache::remove_path(&path);
                }
            }
        }

        info!(removed, data_type = data_type.unwrap_or("*"), "cache cleared");
        removed
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();

        let mut purged = {
            let mut mem = self.memory.lock();
            let before = mem.entries.len();
            mem.entries
                .retain(|_, e| !self.ttl.is_expired(e.timestamp, &e.data_type, now));
            before - mem.entries.len()
        };

        if let Some(disk) = &self.disk {
            purged += self.purge_disk(disk, now);
        }

        *self.last_sweep.lock() = Some(now);
        if purged > 0 {
            info!(purged, "purged expired cache entries");
        }
        purged
    }

    fn purge_disk(&self, disk: &FileCache, now: DateTime<Utc>) -> usize {
        let mut purged = 0;

        match disk.entry_files() {
            Ok(files) => {
                for path in files {
                    let expired = match FileCache::read_path(&path) {
                        Ok(entry) => self.ttl.is_expired(entry.timestamp, &entry.data_type, now),
                        Err(e) => {
                            debug!(path = %path.display(), error = %e, "corrupted cache file");
                            true
                        }
                    };
                    if expired && FileCache::remove_path(&path).unwrap_or(false) {
                        purged += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to list cache directory"),
        }

        if let Ok(orphans) = disk.orphaned_temp_files() {
            for path in orphans {
                let stale = std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                    .is_some_and(|age| age > ORPHAN_GRACE);
                if stale && FileCache::remove_path(&path).unwrap_or(false) {
                    purged += 1;
                }
            }
        }

        purged
    }

    fn stats(&self) -> CacheStats {
        let (memory_entries, memory_by_type, hits, misses) = {
            let mem = self.memory.lock();
            let mut by_type = BTreeMap::new();
            for entry in mem.entries.values() {
                *by_type.entry(entry.data_type.clone()).or_insert(0) += 1;
            }
            (mem.entries.len(), by_type, mem.hits, mem.misses)
        };

        let mut disk_entries = 0;
        let mut disk_size_bytes = 0;
        let mut disk_by_type = BTreeMap::new();
        if let Some(disk) = &self.disk {
            for path in disk.entry_files().unwrap_or_default() {
                disk_entries += 1;
                disk_size_bytes += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                let data_type = FileCache::read_path(&path)
                    .map(|e| e.data_type)
                    .unwrap_or_else(|_| "corrupted".to_string());
                *disk_by_type.entry(data_type).or_insert(0) += 1;
            }
        }

        let total_requests = hits + misses;
        let last_sweep = *self.last_sweep.lock();
        let since_last_sweep =
            last_sweep.map(|at| (self.clock.now() - at).to_std().unwrap_or_default());

        CacheStats {
            memory_entries,
            memory_limit: self.memory_limit,
            memory_usage_percent: if self.memory_limit > 0 {
                memory_entries as f64 / self.memory_limit as f64 * 100.0
            } else {
                0.0
            },
            disk_entries,
            disk_size_bytes,
            memory_by_type,
            disk_by_type,
            cache_hits: hits,
            cache_misses: misses,
            hit_rate: if total_requests > 0 {
                hits as f64 / total_requests as f64 * 100.0
            } else {
                0.0
            },
            since_last_sweep,
            cache_directory: self.disk.as_ref().map(|d| d.cache_dir().to_path_buf()),
        }
    }
}

/// Owned background worker that purges expired entries on an interval
#[derive(Debug)]
struct Sweeper {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    fn spawn(inner: Arc<CacheInner>, interval: Duration) -> Option<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let spawned = std::thread::Builder::new()
            .name("cache-sweeper".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let purged = inner.purge_expired();
                        debug!(purged, "cache sweep finished");
                    }
                    // Stop requested or manager dropped
                    _ => break,
                }
            });

        match spawned {
            Ok(handle) => Some(Self { stop_tx, handle }),
            Err(e) => {
                warn!(error = %e, "failed to start cache sweeper");
                None
            }
        }
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            warn!("cache sweeper panicked");
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_limit: usize,
    pub memory_usage_percent: f64,
    pub disk_entries: usize,
    pub disk_size_bytes: u64,
    pub memory_by_type: BTreeMap<String, usize>,
    pub disk_by_type: BTreeMap<String, usize>,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub hit_rate: f64,
    pub since_last_sweep: Option<Duration>,
    pub cache_directory: Option<PathBuf>,
}

impl CacheStats {
    /// Format cache stats for display
    pub fn format(&self) -> String {
        let sweep = match self.since_last_sweep {
            Some(d) => format!("{}s ago", d.as_secs()),
            None => "never".to_string(),
        };
        format!(
            "Cache Statistics:\n\
            Directory: {}\n\
            Memory: {}/{} entries ({:.1}%)\n\
            Disk: {} entries ({:.2} MB)\n\
            Hit Rate: {:.1}% ({} hits, {} misses)\n\
            Last sweep: {}",
            self.cache_directory
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "(memory only)".to_string()),
            self.memory_entries,
            self.memory_limit,
            self.memory_usage_percent,
            self.disk_entries,
            self.disk_size_bytes as f64 / 1_048_576.0,
            self.hit_rate,
            self.cache_hits,
            self.cache_misses,
            sweep
        )
    }
}
