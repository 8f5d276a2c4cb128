//! Blob backends: raw bytes addressed by an opaque [`StorageKey`].
//!
//! Backends know nothing about digests or references. Deduplication is the
//! coordinator's job; a backend just creates, reads and deletes.
//!
//! Filesystem layout:
//! ```text
//! {root}/
//! ├── ab/
//! │   └── cde123....txt   # committed blob
//! └── tmp/
//!     └── 4f1c...         # in-flight write, renamed into place when complete
//! ```

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::config::BlobConfig;
use crate::key::StorageKey;

/// Capability for storing raw bytes by key.
///
/// Distinct keys may be written concurrently. Callers must not write the
/// same key concurrently.
pub trait BlobStore: Send + Sync {
    /// Persist `data` under `key`. Either the whole blob becomes visible or nothing does.
    fn create(&self, key: &StorageKey, data: &[u8]) -> Result<()>;

    /// Read the bytes under `key`. `Ok(None)` if the key is absent.
    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>>;

    /// Remove the bytes under `key`. Returns `false` if nothing was there.
    fn delete(&self, key: &StorageKey) -> Result<bool>;
}

/// Filesystem-backed blob store.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    config: BlobConfig,
}

impl FsBlobStore {
    /// Create a store with the given configuration.
    ///
    /// Creates the root and temp directories unless read-only.
    pub fn new(config: BlobConfig) -> Result<Self> {
        if !config.read_only {
            fs::create_dir_all(&config.root).context("failed to create blob root directory")?;
            fs::create_dir_all(config.tmp_dir()).context("failed to create blob tmp directory")?;
        }

        Ok(Self { config })
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(BlobConfig::with_root(path))
    }

    pub fn read_only_at(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(BlobConfig::read_only(path))
    }

    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    fn tmp_path(&self) -> PathBuf {
        self.config.tmp_dir().join(Uuid::new_v4().simple().to_string())
    }
}

impl BlobStore for FsBlobStore {
    fn create(&self, key: &StorageKey, data: &[u8]) -> Result<()> {
        if self.config.read_only {
            anyhow::bail!("blob store is in read-only mode");
        }

        let delay = self.config.write_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let final_path = key.to_path(&self.config.root);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).context("failed to create blob shard directory")?;
        }

        let tmp_path = self.tmp_path();
        let written = (|| -> io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e).with_context(|| format!("failed to write blob {}", key));
        }

        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e).with_context(|| format!("failed to commit blob {}", key));
        }

        tracing::debug!(key = %key, bytes = data.len(), "blob written");
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>> {
        match fs::read(key.to_path(&self.config.root)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read blob {}", key)),
        }
    }

    fn delete(&self, key: &StorageKey) -> Result<bool> {
        if self.config.read_only {
            anyhow::bail!("blob store is in read-only mode");
        }

        match fs::remove_file(key.to_path(&self.config.root)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to delete blob {}", key)),
        }
    }
}

/// In-memory blob store. Counts physical writes so tests can assert dedup.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<StorageKey, Vec<u8>>>,
    writes: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `create` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn create(&self, key: &StorageKey, data: &[u8]) -> Result<()> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| anyhow::anyhow!("blob map lock poisoned"))?;
        blobs.insert(key.clone(), data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| anyhow::anyhow!("blob map lock poisoned"))?;
        Ok(blobs.get(key).cloned())
    }

    fn delete(&self, key: &StorageKey) -> Result<bool> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| anyhow::anyhow!("blob map lock poisoned"))?;
        Ok(blobs.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn key_for(data: &[u8]) -> StorageKey {
        StorageKey::for_digest(&Digest::from_data(data))
    }

    #[test]
    fn test_create_and_get() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::at_path(temp_dir.path())?;

        let key = key_for(b"hello");
        store.create(&key, b"hello")?;

        assert_eq!(store.get(&key)?.as_deref(), Some(&b"hello"[..]));
        assert!(key.to_path(temp_dir.path()).exists());
        Ok(())
    }

    #[test]
    fn test_get_missing_is_none() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::at_path(temp_dir.path())?;

        assert!(store.get(&key_for(b"never written"))?.is_none());
        Ok(())
    }

    #[test]
    fn test_delete_is_idempotent() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::at_path(temp_dir.path())?;

        let key = key_for(b"doomed");
        store.create(&key, b"doomed")?;
        assert!(store.delete(&key)?);
        assert!(!store.delete(&key)?);
        assert!(store.get(&key)?.is_none());
        Ok(())
    }

    #[test]
    fn test_no_temp_files_left_behind() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::at_path(temp_dir.path())?;

        store.create(&key_for(b"one"), b"one")?;
        store.create(&key_for(b"two"), b"two")?;

        let leftovers = fs::read_dir(store.config().tmp_dir())?.count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[test]
    fn test_read_only_prevents_writes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::read_only_at(temp_dir.path())?;

        let result = store.create(&key_for(b"nope"), b"nope");
        assert!(result.unwrap_err().to_string().contains("read-only"));
        Ok(())
    }

    #[test]
    fn test_read_only_allows_reads() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let key = key_for(b"readable");

        FsBlobStore::at_path(temp_dir.path())?.create(&key, b"readable")?;

        let readonly = FsBlobStore::read_only_at(temp_dir.path())?;
        assert_eq!(readonly.get(&key)?.as_deref(), Some(&b"readable"[..]));
        Ok(())
    }

    #[test]
    fn test_write_delay_applies() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config =
            BlobConfig::with_root(temp_dir.path()).with_write_delay(Duration::from_millis(50));
        let store = FsBlobStore::new(config)?;

        let start = Instant::now();
        store.create(&key_for(b"slow"), b"slow")?;
        assert!(start.elapsed() >= Duration::from_millis(50));
        Ok(())
    }

    #[test]
    fn test_concurrent_distinct_keys() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = Arc::new(FsBlobStore::at_path(temp_dir.path())?);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    let data = format!("blob {}", i).into_bytes();
                    let key = key_for(&data);
                    store.create(&key, &data).expect("write failed");
                    (key, data)
                })
            })
            .collect();

        for handle in handles {
            let (key, data) = handle.join().unwrap();
            assert_eq!(store.get(&key)?, Some(data));
        }
        Ok(())
    }

    #[test]
    fn test_memory_store_counts_writes() -> Result<()> {
        let store = MemoryBlobStore::new();
        let key = key_for(b"counted");

        assert!(store.is_empty());
        store.create(&key, b"counted")?;
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.get(&key)?.as_deref(), Some(&b"counted"[..]));
        assert!(store.delete(&key)?);
        assert!(!store.delete(&key)?);
        Ok(())
    }
}
