//! Key/value storage backends for the persistence cache.

use crate::error::StorageError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Browser-local-storage sized default quota
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Byte storage addressed by string keys.
///
/// A failed `write` leaves the previous value (or absence) of the key intact.
pub trait Storage: Send {
    fn read(&self, key: &str) -> Option<Vec<u8>>;

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Removing a missing key is not an error
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// In-process storage with a byte quota over keys and values
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    entries: HashMap<String, Vec<u8>>,
    quota_bytes: usize,
    used_bytes: usize,
}

impl MemoryStorage {
    pub fn new(quota_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            quota_bytes,
            used_bytes: 0,
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA_BYTES)
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let freed = self.entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
        let needed = key.len() + bytes.len();
        let available = self.quota_bytes.saturating_sub(self.used_bytes - freed);
        if needed > available {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                needed,
                available,
            });
        }
        self.entries.insert(key.to_string(), bytes.to_vec());
        self.used_bytes = self.used_bytes - freed + needed;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        if let Some(v) = self.entries.remove(key) {
            self.used_bytes -= key.len() + v.len();
        }
        Ok(())
    }
}

/// One file per key under a directory, with a byte quota over file sizes
#[derive(Debug)]
pub struct DirStorage {
    root: PathBuf,
    quota_bytes: usize,
    used_bytes: usize,
}

impl DirStorage {
    /// Open (creating if needed) a storage directory and measure what it holds
    pub fn open(root: impl Into<PathBuf>, quota_bytes: usize) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let mut used_bytes = 0;
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_file() {
                used_bytes += meta.len() as usize;
            }
        }
        debug!(path = %root.display(), used_bytes, "Opened storage directory");

        Ok(Self {
            root,
            quota_bytes,
            used_bytes,
        })
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", name))
    }

    fn current_size(path: &Path) -> usize {
        fs::metadata(path).map(|m| m.len() as usize).unwrap_or(0)
    }
}

impl Storage for DirStorage {
    fn read(&self, key: &str) -> Option<Vec<u8>> {
        fs::read(self.path_for(key)).ok()
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let freed = Self::current_size(&path);
        let available = self.quota_bytes.saturating_sub(self.used_bytes - freed);
        if bytes.len() > available {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                needed: bytes.len(),
                available,
            });
        }

        // Write beside the target and rename so a failed write never leaves
        // a truncated value behind
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp, bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        fs::rename(&tmp, &path)?;

        self.used_bytes = self.used_bytes - freed + bytes.len();
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let size = Self::current_size(&path);
        match fs::remove_file(&path) {
            Ok(()) => {
                self.used_bytes -= size;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_quota() {
        let mut storage = MemoryStorage::new(16);
        storage.write("a", b"0123456789").unwrap();
        assert_eq!(storage.used_bytes(), 11);

        let err = storage.write("b", b"0123456789").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert!(storage.read("b").is_none());

        // Overwriting reuses the space of the old value
        storage.write("a", b"abcdefghijklmn").unwrap();
        assert_eq!(storage.used_bytes(), 15);

        storage.remove("a").unwrap();
        assert_eq!(storage.used_bytes(), 0);
        storage.remove("a").unwrap();
    }

    #[test]
    fn test_dir_storage_roundtrip_and_quota() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = DirStorage::open(dir.path(), 20).unwrap();

        storage.write("cities_0", b"[1,2,3]").unwrap();
        assert_eq!(storage.read("cities_0").as_deref(), Some(&b"[1,2,3]"[..]));
        assert_eq!(storage.used_bytes(), 7);

        let err = storage.write("cities_1", &[b'x'; 14]).unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert!(storage.read("cities_1").is_none());

        storage.remove("cities_0").unwrap();
        assert!(storage.read("cities_0").is_none());
        assert_eq!(storage.used_bytes(), 0);
    }

    #[test]
    fn test_dir_storage_measures_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut storage = DirStorage::open(dir.path(), 1024).unwrap();
            storage.write("k", b"hello").unwrap();
        }
        let storage = DirStorage::open(dir.path(), 1024).unwrap();
        assert_eq!(storage.used_bytes(), 5);
        assert_eq!(storage.read("k").as_deref(), Some(&b"hello"[..]));
    }
}
