//! Durable key-value side-store for the digest index and reference catalog.
//!
//! Callers only see [`KvStore`]: get, put, delete, and a full scan for
//! startup. How bytes reach the disk is the backend's business.
//!
//! Every backend keeps the whole map in memory and treats it as the source of
//! truth. A failed persist is logged and retried on the next mutation (the
//! snapshot is rewritten, the sqlite table is resynced), so a disk hiccup
//! costs a bounded durability window rather than a failed request.

pub mod memory;
pub mod snapshot;
pub mod sqlite;

pub use memory::MemoryKv;
pub use snapshot::SnapshotKv;
pub use sqlite::SqliteKv;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use uniqconf::MetadataBackend;

/// Minimal key-value capability.
pub trait KvStore<V>: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<V>>;

    /// Insert or replace.
    fn put(&self, key: &str, value: V) -> Result<()>;

    /// Returns `true` if the key was present.
    fn delete(&self, key: &str) -> Result<bool>;

    /// All entries, ordered by key.
    fn entries(&self) -> Result<Vec<(String, V)>>;

    fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Force the full state to disk, surfacing any error.
    fn flush(&self) -> Result<()> {
        Ok(()) // No-op for in-memory stores
    }
}

/// Open a file-backed store of the configured kind.
pub fn open_kv<V>(backend: MetadataBackend, path: &Path) -> Result<Box<dyn KvStore<V>>>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    Ok(match backend {
        MetadataBackend::Sqlite => Box::new(SqliteKv::open(path)?),
        MetadataBackend::Snapshot => Box::new(SnapshotKv::open(path)?),
    })
}

/// Write `bytes` to `path` atomically: temp file, fsync, rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&temp_path, path)
}
