use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::CacheEntry;
use crate::constants::{CACHE_FILE_EXTENSION, CACHE_TMP_MARKER};
use crate::utils::CacheError;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Disk tier: one JSON file per key, named by the key's SHA-256 hex digest
#[derive(Debug)]
pub struct FileCache {
    cache_dir: PathBuf,
}

impl FileCache {
    /// Create a new file cache
    pub fn new(cache_dir: PathBuf) -> Result<Self, CacheError> {
        // Ensure cache directory exists
        fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Compute SHA256 hex digest of a cache key
    pub fn hash_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Cache file path for a key
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", Self::hash_key(key), CACHE_FILE_EXTENSION))
    }

    /// Load an entry. Missing file is `Ok(None)`; unreadable content is an error.
    pub fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        match Self::read_path(&self.entry_path(key)) {
            Ok(entry) => Ok(Some(entry)),
            Err(CacheError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn read_path(path: &Path) -> Result<CacheEntry, CacheError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write an entry via temp file + rename so readers never see a partial file
    pub fn save(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let dest = self.entry_path(key);
        let serialized = serde_json::to_vec(entry)?;

        let tmp_path = dest.with_extension(format!(
            "{}{}{}-{}",
            CACHE_FILE_EXTENSION,
            CACHE_TMP_MARKER,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let write_result = (|| -> io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
            Ok(())
        })();

        let result = write_result.and_then(|_| fs::rename(&tmp_path, &dest));
        if let Err(err) = result {
            if let Err(remove_err) = fs::remove_file(&tmp_path) {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(
                        path = %tmp_path.display(),
                        error = %remove_err,
                        "failed to remove temporary cache file"
                    );
                }
            }
            return Err(err.into());
        }

        Ok(())
    }

    /// Remove the entry for a key; returns whether a file existed
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Self::remove_path(&self.entry_path(key))
    }

    pub fn remove_path(path: &Path) -> Result<bool, CacheError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Committed entry files in the cache directory
    pub fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        self.scan(|name| {
            name.ends_with(&format!(".{}", CACHE_FILE_EXTENSION)) && !name.contains(CACHE_TMP_MARKER)
        })
    }

    /// Temp files left behind by interrupted writes
    pub fn orphaned_temp_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        self.scan(|name| name.contains(CACHE_TMP_MARKER))
    }

    fn scan(&self, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()).is_some_and(|n| keep(n)) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_hash_key_is_deterministic_hex() {
        let a = FileCache::hash_key("property:123");
        assert_eq!(a, FileCache::hash_key("property:123"));
        assert_ne!(a, FileCache::hash_key("property:124"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_save_load_remove() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path().to_path_buf()).unwrap();
        let entry = CacheEntry::new(json!({"beds": 3}), "default", Utc::now());

        cache.save("k", &entry).unwrap();
        assert_eq!(cache.load("k").unwrap(), Some(entry));
        assert_eq!(cache.entry_files().unwrap().len(), 1);
        assert!(cache.orphaned_temp_files().unwrap().is_empty());

        assert!(cache.remove("k").unwrap());
        assert!(!cache.remove("k").unwrap());
        assert_eq!(cache.load("k").unwrap(), None);
    }

    #[test]
    fn test_corrupted_file_is_error() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path().to_path_buf()).unwrap();
        fs::write(cache.entry_path("bad"), b"{not json").unwrap();
        assert!(matches!(cache.load("bad"), Err(CacheError::Serialization(_))));
    }
}
