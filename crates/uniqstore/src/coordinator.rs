//! Store coordinator: the transaction boundary across blobs, index and catalog.
//!
//! Upload order is fixed: look up the digest, write the blob on a miss,
//! record the digest, then append the reference. An index entry therefore
//! always means the bytes are on disk, and a reference always points at an
//! indexed digest. The whole sequence runs under the digest's exclusive lock,
//! so two uploads of the same content cannot both write it.

use crate::catalog::{display_name, ReferenceCatalog, ReferenceId, ReferenceRecord, TEXT_CONTENT_TYPE};
use crate::error::{StoreError, StoreResult};
use crate::index::DigestIndex;
use crate::locks::{DigestGuard, DigestLocks};
use crate::persistence::MemoryKv;
use crate::telemetry;
use cas::{BlobStore, Digest, StorageKey};
use serde::Serialize;
use std::sync::Arc;

/// What a client handed us to store.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// Raw text. Hashed and deduplicated.
    Content(String),
    /// Raw text plus the digest the client claims it has. The claim is checked.
    ContentWithDigest { content: String, digest: Digest },
    /// A digest the store must already hold. No bytes are written.
    Digest(Digest),
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub digests: usize,
    pub references: usize,
    pub next_id: ReferenceId,
}

pub struct StoreCoordinator {
    blobs: Arc<dyn BlobStore>,
    index: DigestIndex,
    catalog: ReferenceCatalog,
    locks: DigestLocks,
}

impl StoreCoordinator {
    pub fn new(blobs: Arc<dyn BlobStore>, index: DigestIndex, catalog: ReferenceCatalog) -> Self {
        Self {
            blobs,
            index,
            catalog,
            locks: DigestLocks::new(),
        }
    }

    /// Coordinator whose index and catalog live only in memory.
    pub fn ephemeral(blobs: Arc<dyn BlobStore>) -> anyhow::Result<Self> {
        let index = DigestIndex::new(Box::new(MemoryKv::new()));
        let catalog = ReferenceCatalog::open(Box::new(MemoryKv::new()), Box::new(MemoryKv::new()))?;
        Ok(Self::new(blobs, index, catalog))
    }

    /// Store content (or register a digest) and create a new reference to it.
    #[tracing::instrument(skip(self, source), fields(digest = tracing::field::Empty, id = tracing::field::Empty))]
    pub async fn upload(&self, source: UploadSource, path: &str) -> StoreResult<ReferenceRecord> {
        let held = match source {
            UploadSource::Content(content) => self.ingest(content).await?,
            UploadSource::ContentWithDigest { content, digest } => {
                let actual = Digest::from_data(content.as_bytes());
                if actual != digest {
                    return Err(StoreError::BadInput(format!(
                        "hash {digest} does not match body (computed {actual})"
                    )));
                }
                self.ingest(content).await?
            }
            UploadSource::Digest(digest) => self.register(digest).await?,
        };
        let record = self.append_reference(held, path)?;

        let span = tracing::Span::current();
        span.record("digest", tracing::field::display(&record.digest));
        span.record("id", record.id.0);
        Ok(record)
    }

    /// Hash and, on an index miss, write the content. Returns the digest's
    /// exclusive guard so the caller appends under it.
    async fn ingest(&self, content: String) -> StoreResult<Held> {
        let digest = Digest::from_data(content.as_bytes());
        let guard = self.locks.write(&digest).await;

        let deduplicated = match self.index.lookup(&digest)? {
            Some(key) => {
                tracing::debug!(digest = %digest, key = %key, "content already stored, skipping write");
                true
            }
            None => {
                let key = StorageKey::for_digest(&digest);
                self.write_blob(&key, content.into_bytes()).await?;
                self.index.record(&digest, &key)?;
                tracing::info!(digest = %digest, key = %key, "content stored");
                false
            }
        };
        telemetry::record_upload(deduplicated);

        Ok(Held { digest, _guard: guard })
    }

    /// Resolve a caller-supplied digest. Only a lookup; the store must already hold it.
    async fn register(&self, digest: Digest) -> StoreResult<Held> {
        let guard = self.locks.read(&digest).await;
        if self.index.lookup(&digest)?.is_none() {
            return Err(StoreError::BadInput(format!(
                "hash {digest} has not been uploaded"
            )));
        }
        tracing::debug!(digest = %digest, "registering reference to existing content");
        Ok(Held { digest, _guard: guard })
    }

    fn append_reference(&self, held: Held, path: &str) -> StoreResult<ReferenceRecord> {
        let record = self
            .catalog
            .append(&held.digest, display_name(path), TEXT_CONTENT_TYPE)?;
        tracing::info!(id = %record.id, digest = %record.digest, name = %record.name, "reference created");
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    pub async fn fetch_by_id(&self, id: ReferenceId) -> StoreResult<ReferenceRecord> {
        self.catalog
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(format!("reference {id} not found")))
    }

    /// The record for `id` together with the bytes it names.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_content_by_id(&self, id: ReferenceId) -> StoreResult<(ReferenceRecord, Vec<u8>)> {
        let record = self.fetch_by_id(id).await?;
        let _guard = self.locks.read(&record.digest).await;

        let key = self.index.lookup(&record.digest)?.ok_or_else(|| {
            StoreError::NotFound(format!(
                "content {} for reference {id} not found",
                record.digest
            ))
        })?;
        let bytes = self.read_blob(&key).await?;
        Ok((record, bytes))
    }

    /// Raw bytes for `digest`. An unindexed digest never reaches the blob store.
    #[tracing::instrument(skip(self, digest), fields(digest = %digest))]
    pub async fn fetch_by_digest(&self, digest: &Digest) -> StoreResult<Vec<u8>> {
        let _guard = self.locks.read(digest).await;

        let key = self
            .index
            .lookup(digest)?
            .ok_or_else(|| StoreError::NotFound(format!("hash {digest} not found")))?;
        self.read_blob(&key).await
    }

    #[tracing::instrument(skip(self, digest), fields(digest = %digest))]
    pub async fn exists(&self, digest: &Digest) -> StoreResult<bool> {
        let _guard = self.locks.read(digest).await;
        Ok(self.index.lookup(digest)?.is_some())
    }

    /// Drop a reference. The digest and its bytes stay; other references may use them.
    #[tracing::instrument(skip(self))]
    pub async fn delete_reference(&self, id: ReferenceId) -> StoreResult<bool> {
        let removed = self.catalog.delete(id)?;
        if removed {
            tracing::info!(id = %id, "reference deleted");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats {
            digests: self.index.len()?,
            references: self.catalog.len()?,
            next_id: self.catalog.next_id()?,
        })
    }

    /// Push all metadata to disk. Called once on shutdown.
    pub fn flush(&self) -> StoreResult<()> {
        self.index.flush()?;
        self.catalog.flush()?;
        Ok(())
    }

    async fn write_blob(&self, key: &StorageKey, bytes: Vec<u8>) -> StoreResult<()> {
        let blobs = self.blobs.clone();
        let blob_key = key.clone();
        tokio::task::spawn_blocking(move || blobs.create(&blob_key, &bytes))
            .await?
            .map_err(|e| StoreError::StorageUnavailable(format!("failed to write {key}: {e:#}")))
    }

    async fn read_blob(&self, key: &StorageKey) -> StoreResult<Vec<u8>> {
        let blobs = self.blobs.clone();
        let blob_key = key.clone();
        let found = tokio::task::spawn_blocking(move || blobs.get(&blob_key))
            .await?
            .map_err(|e| StoreError::StorageUnavailable(format!("failed to read {key}: {e:#}")))?;

        // The index promised these bytes; their absence is a storage fault.
        found.ok_or_else(|| StoreError::StorageUnavailable(format!("blob {key} is missing")))
    }
}

/// A resolved digest plus the lock that keeps it stable until the reference is appended.
struct Held {
    digest: Digest,
    _guard: DigestGuard,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use cas::MemoryBlobStore;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator_with(blobs: Arc<dyn BlobStore>) -> StoreCoordinator {
        StoreCoordinator::ephemeral(blobs).unwrap()
    }

    fn memory_coordinator() -> (StoreCoordinator, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        (coordinator_with(blobs.clone()), blobs)
    }

    /// Fails every write; counts every call.
    #[derive(Default)]
    struct BrokenBlobStore {
        calls: AtomicUsize,
    }

    impl BlobStore for BrokenBlobStore {
        fn create(&self, _key: &StorageKey, _data: &[u8]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            bail!("disk unplugged")
        }

        fn get(&self, _key: &StorageKey) -> Result<Option<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            bail!("disk unplugged")
        }

        fn delete(&self, _key: &StorageKey) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            bail!("disk unplugged")
        }
    }

    fn text(s: &str) -> UploadSource {
        UploadSource::Content(s.to_string())
    }

    #[tokio::test]
    async fn test_hello_twice_dedups() {
        let (store, blobs) = memory_coordinator();

        let first = store.upload(text("hello"), "greetings/hello.txt").await.unwrap();
        let second = store.upload(text("hello"), "hello-again.txt").await.unwrap();

        assert_eq!(first.id, ReferenceId(0));
        assert_eq!(second.id, ReferenceId(1));
        assert_eq!(first.digest, second.digest);
        assert_eq!(first.digest, Digest::from_data(b"hello"));
        assert_eq!(first.name, "hello.txt");
        assert_eq!(first.content_type, "text/plain");
        assert_eq!(blobs.write_count(), 1);

        for id in [first.id, second.id] {
            let (record, bytes) = store.fetch_content_by_id(id).await.unwrap();
            assert_eq!(record.id, id);
            assert_eq!(bytes, b"hello");
        }
        assert_eq!(store.fetch_by_digest(&first.digest).await.unwrap(), b"hello");
        assert!(store.exists(&first.digest).await.unwrap());
        assert!(!store.exists(&Digest::from_data(b"unrelated")).await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_unknown_id_is_not_found() {
        let (store, _) = memory_coordinator();
        store.upload(text("x"), "x").await.unwrap();

        let err = store.fetch_by_id(ReferenceId(5)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        let err = store.fetch_content_by_id(ReferenceId(5)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_unknown_digest_skips_blob_store() {
        let blobs = Arc::new(BrokenBlobStore::default());
        let store = coordinator_with(blobs.clone());

        let err = store
            .fetch_by_digest(&Digest::from_data(b"never stored"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(blobs.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_digest_only_upload_requires_known_digest() {
        let (store, _) = memory_coordinator();

        let err = store
            .upload(UploadSource::Digest(Digest::from_data(b"ghost")), "ghost.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BadInput(_)));
        assert_eq!(store.stats().unwrap().references, 0);
        assert_eq!(store.stats().unwrap().next_id, ReferenceId(0));
    }

    #[tokio::test]
    async fn test_digest_only_upload_links_existing_content() {
        let (store, blobs) = memory_coordinator();
        let original = store.upload(text("shared text"), "a.txt").await.unwrap();

        let linked = store
            .upload(UploadSource::Digest(original.digest.clone()), "b.txt")
            .await
            .unwrap();
        assert_eq!(linked.digest, original.digest);
        assert_eq!(linked.name, "b.txt");
        assert_eq!(blobs.write_count(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_digest_is_rejected() {
        let (store, blobs) = memory_coordinator();

        let err = store
            .upload(
                UploadSource::ContentWithDigest {
                    content: "real".to_string(),
                    digest: Digest::from_data(b"claimed"),
                },
                "m.txt",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BadInput(_)));
        assert_eq!(blobs.write_count(), 0);

        let ok = store
            .upload(
                UploadSource::ContentWithDigest {
                    content: "real".to_string(),
                    digest: Digest::from_data(b"real"),
                },
                "m.txt",
            )
            .await
            .unwrap();
        assert_eq!(ok.digest, Digest::from_data(b"real"));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_trace() {
        let store = coordinator_with(Arc::new(BrokenBlobStore::default()));

        let err = store.upload(text("doomed"), "d.txt").await.unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));

        let digest = Digest::from_data(b"doomed");
        assert!(!store.exists(&digest).await.unwrap());
        let stats = store.stats().unwrap();
        assert_eq!(stats.digests, 0);
        assert_eq!(stats.references, 0);
    }

    #[tokio::test]
    async fn test_missing_blob_is_storage_unavailable() {
        let (store, blobs) = memory_coordinator();
        let record = store.upload(text("vanishing"), "v.txt").await.unwrap();
        blobs.delete(&StorageKey::for_digest(&record.digest)).unwrap();

        let err = store.fetch_by_digest(&record.digest).await.unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_delete_reference_keeps_content() {
        let (store, _) = memory_coordinator();
        let a = store.upload(text("keep me"), "a").await.unwrap();
        let b = store.upload(text("keep me"), "b").await.unwrap();

        assert!(store.delete_reference(a.id).await.unwrap());
        assert!(!store.delete_reference(a.id).await.unwrap());

        assert!(matches!(
            store.fetch_by_id(a.id).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        let (_, bytes) = store.fetch_content_by_id(b.id).await.unwrap();
        assert_eq!(bytes, b"keep me");
        assert!(store.exists(&a.digest).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_uploads_write_once() {
        let (store, blobs) = memory_coordinator();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.upload(text("same"), &format!("{i}.txt")).await })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            let record = handle.await.unwrap().unwrap();
            assert_eq!(record.digest, Digest::from_data(b"same"));
            ids.insert(record.id.0);
        }

        assert_eq!(ids, (0..32).collect::<HashSet<u64>>());
        assert_eq!(blobs.write_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_uploads_continue_from_existing_counter() {
        let (store, blobs) = memory_coordinator();
        for i in 0..3 {
            store.upload(text(&format!("earlier {i}")), "earlier.txt").await.unwrap();
        }
        let store = Arc::new(store);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let body = if i % 2 == 0 { "even".to_string() } else { format!("odd {i}") };
                tokio::spawn(async move { store.upload(text(&body), "later.txt").await })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap().id.0);
        }

        assert_eq!(ids, (3..19).collect::<HashSet<u64>>());
        assert_eq!(store.stats().unwrap().next_id, ReferenceId(19));
        // 3 earlier + "even" + 8 odd bodies
        assert_eq!(blobs.write_count(), 12);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_distinct_uploads_stay_separate() {
        let (store, blobs) = memory_coordinator();
        let store = Arc::new(store);

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.upload(text("a"), "a.txt").await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.upload(text("b"), "b.txt").await }
        });
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(a.digest, b.digest);
        assert_ne!(StorageKey::for_digest(&a.digest), StorageKey::for_digest(&b.digest));
        assert_eq!(blobs.write_count(), 2);

        assert_eq!(store.fetch_content_by_id(a.id).await.unwrap().1, b"a");
        assert_eq!(store.fetch_content_by_id(b.id).await.unwrap().1, b"b");
    }
}
