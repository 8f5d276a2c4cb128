//! Per-digest reader/writer locks.
//!
//! Uploads hold the exclusive side of their digest across lookup, blob write,
//! index record and catalog append. Reads hold the shared side of the digest
//! they resolve. Different digests use different locks and never contend.

use cas::Digest;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type Slot = Arc<RwLock<()>>;

#[derive(Default)]
pub struct DigestLocks {
    slots: Arc<DashMap<Digest, Slot>>,
}

/// Holds one digest's lock until dropped. Exactly one side is set.
pub struct DigestGuard {
    _read: Option<OwnedRwLockReadGuard<()>>,
    _write: Option<OwnedRwLockWriteGuard<()>>,
    digest: Digest,
    slots: Arc<DashMap<Digest, Slot>>,
}

impl Drop for DigestGuard {
    fn drop(&mut self) {
        // Release first so our own Arc is the only one the table can see.
        self._read = None;
        self._write = None;
        self.slots
            .remove_if(&self.digest, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl DigestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, digest: &Digest) -> Slot {
        self.slots
            .entry(digest.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Exclusive hold on `digest`.
    pub async fn write(&self, digest: &Digest) -> DigestGuard {
        let guard = self.slot(digest).write_owned().await;
        DigestGuard {
            _read: None,
            _write: Some(guard),
            digest: digest.clone(),
            slots: self.slots.clone(),
        }
    }

    /// Shared hold on `digest`.
    pub async fn read(&self, digest: &Digest) -> DigestGuard {
        let guard = self.slot(digest).read_owned().await;
        DigestGuard {
            _read: Some(guard),
            _write: None,
            digest: digest.clone(),
            slots: self.slots.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_table_is_emptied_after_release() {
        let locks = DigestLocks::new();
        let digest = Digest::from_data(b"transient");

        {
            let _guard = locks.write(&digest).await;
            assert_eq!(locks.slots.len(), 1);
        }
        assert_eq!(locks.slots.len(), 0);
    }

    #[tokio::test]
    async fn test_readers_share() {
        let locks = DigestLocks::new();
        let digest = Digest::from_data(b"shared");

        let first = locks.read(&digest).await;
        let second = timeout(Duration::from_millis(100), locks.read(&digest))
            .await
            .expect("second reader should not block");

        drop(first);
        assert_eq!(locks.slots.len(), 1);
        drop(second);
        assert_eq!(locks.slots.len(), 0);
    }

    #[tokio::test]
    async fn test_writer_excludes_readers_of_same_digest() {
        let locks = DigestLocks::new();
        let digest = Digest::from_data(b"busy");

        let writer = locks.write(&digest).await;
        let blocked = timeout(Duration::from_millis(50), locks.read(&digest)).await;
        assert!(blocked.is_err());

        drop(writer);
        let reader = timeout(Duration::from_millis(100), locks.read(&digest)).await;
        assert!(reader.is_ok(), "reader should proceed after writer releases");
    }

    #[tokio::test]
    async fn test_unrelated_digests_do_not_contend() {
        let locks = DigestLocks::new();
        let a = Digest::from_data(b"a");
        let b = Digest::from_data(b"b");

        let _held = locks.write(&a).await;
        let other = timeout(Duration::from_millis(100), locks.write(&b)).await;
        assert!(other.is_ok());
        assert_eq!(locks.slots.len(), 2);
    }
}
