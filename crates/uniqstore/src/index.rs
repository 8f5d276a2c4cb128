//! Digest index: content digest → storage key.
//!
//! An entry is a promise that the blob under its key was fully written.
//! Entries are append-only: a digest's key never changes once recorded.

use crate::persistence::KvStore;
use cas::{Digest, StorageKey};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("digest {digest} already maps to {existing}, refusing {proposed}")]
    Conflict {
        digest: Digest,
        existing: StorageKey,
        proposed: StorageKey,
    },

    #[error("digest index backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

pub struct DigestIndex {
    store: Box<dyn KvStore<StorageKey>>,
    /// Makes `record`'s check-then-put atomic.
    write_lock: Mutex<()>,
}

impl DigestIndex {
    pub fn new(store: Box<dyn KvStore<StorageKey>>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn lookup(&self, digest: &Digest) -> Result<Option<StorageKey>, IndexError> {
        Ok(self.store.get(digest.as_str())?)
    }

    /// Map `digest` to `key`. Re-recording the same key is a no-op.
    pub fn record(&self, digest: &Digest, key: &StorageKey) -> Result<(), IndexError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("digest index lock poisoned"))?;

        match self.store.get(digest.as_str())? {
            Some(existing) if &existing == key => Ok(()),
            Some(existing) => Err(IndexError::Conflict {
                digest: digest.clone(),
                existing,
                proposed: key.clone(),
            }),
            None => {
                self.store.put(digest.as_str(), key.clone())?;
                tracing::debug!(digest = %digest, key = %key, "digest indexed");
                Ok(())
            }
        }
    }

    /// Drop a digest. Idempotent. Does not check whether references still point at it.
    pub fn remove(&self, digest: &Digest) -> Result<bool, IndexError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("digest index lock poisoned"))?;
        Ok(self.store.delete(digest.as_str())?)
    }

    pub fn len(&self) -> Result<usize, IndexError> {
        Ok(self.store.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }

    pub fn flush(&self) -> Result<(), IndexError> {
        Ok(self.store.flush()?)
    }
}
