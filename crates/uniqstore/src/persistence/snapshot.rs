//! Whole-map JSON snapshot (JSON file + MemoryKv).
//!
//! Every mutation rewrites the full file through temp + rename, so a crash
//! leaves either the previous snapshot or the new one, never a torn mix.
//! Fine for small stores; cost grows with the map.

use super::{write_atomic, KvStore, MemoryKv};
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub struct SnapshotKv<V> {
    path: PathBuf,
    store: MemoryKv<V>,
    /// Serializes mutate-then-save so snapshots land in mutation order.
    save_lock: Mutex<()>,
    /// Last save failed; memory is ahead of disk.
    dirty: AtomicBool,
}

impl<V> SnapshotKv<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Create/load from file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = MemoryKv::new();

        if path.exists() {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read snapshot {}", path.display()))?;
            let map: BTreeMap<String, V> = serde_json::from_str(&json)
                .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
            for (key, value) in map {
                store.put(&key, value)?;
            }
        }

        tracing::debug!(path = %path.display(), entries = store.len()?, "snapshot loaded");

        Ok(Self {
            path,
            store,
            save_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
        })
    }

    /// Whether the last save failed.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn save(&self) -> Result<()> {
        let entries: BTreeMap<String, V> = self.store.entries()?.into_iter().collect();
        let json = serde_json::to_vec_pretty(&entries).context("failed to serialize snapshot")?;
        write_atomic(&self.path, &json)
            .with_context(|| format!("failed to write snapshot {}", self.path.display()))
    }

    /// Save after a mutation. Failures are logged, not returned.
    fn save_logged(&self) {
        match self.save() {
            Ok(()) => {
                if self.dirty.swap(false, Ordering::SeqCst) {
                    tracing::info!(path = %self.path.display(), "snapshot caught up after earlier failure");
                }
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                tracing::warn!(path = %self.path.display(), error = ?e, "snapshot save failed; keeping in-memory state");
            }
        }
    }
}

impl<V> KvStore<V> for SnapshotKv<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn get(&self, key: &str) -> Result<Option<V>> {
        self.store.get(key)
    }

    fn put(&self, key: &str, value: V) -> Result<()> {
        let _save = self.save_lock.lock().map_err(|_| anyhow!("snapshot lock poisoned"))?;
        self.store.put(key, value)?;
        self.save_logged();
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let _save = self.save_lock.lock().map_err(|_| anyhow!("snapshot lock poisoned"))?;
        let removed = self.store.delete(key)?;
        if removed || self.is_dirty() {
            self.save_logged();
        }
        Ok(removed)
    }

    fn entries(&self) -> Result<Vec<(String, V)>> {
        self.store.entries()
    }

    fn len(&self) -> Result<usize> {
        self.store.len()
    }

    fn flush(&self) -> Result<()> {
        let _save = self.save_lock.lock().map_err(|_| anyhow!("snapshot lock poisoned"))?;
        self.save()?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }
}
