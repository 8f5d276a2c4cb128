//! Integration tests for a store opened from configuration.
//!
//! These tests verify:
//! - References and digests survive a restart with either metadata backend
//! - The id counter never hands out an id twice across restarts
//! - Concurrent uploads against the filesystem backend write each blob once
//! - Concurrent uploads after a restart take the ids right after the old ones

use anyhow::Result;
use cas::{Digest, StorageKey};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use uniqconf::{MetadataBackend, UniqConfig};
use uniqstore::{open_coordinator, ReferenceId, StoreError, UploadSource};

fn config_in(dir: &Path, backend: MetadataBackend) -> UniqConfig {
    let mut config = UniqConfig::default();
    config.paths.state_dir = dir.join("state");
    config.paths.blob_dir = dir.join("blobs");
    config.metadata.backend = backend;
    config
}

fn text(s: &str) -> UploadSource {
    UploadSource::Content(s.to_string())
}

/// Committed blob files under the root, skipping the temp area.
fn blob_files(root: &Path) -> Result<usize> {
    let mut count = 0;
    for shard in std::fs::read_dir(root)? {
        let shard = shard?;
        if shard.file_name() == "tmp" || !shard.file_type()?.is_dir() {
            continue;
        }
        count += std::fs::read_dir(shard.path())?.count();
    }
    Ok(count)
}

async fn survives_restart(backend: MetadataBackend) -> Result<()> {
    let temp = TempDir::new()?;
    let config = config_in(temp.path(), backend);

    let (first, second) = {
        let store = open_coordinator(&config)?;
        let first = store.upload(text("hello"), "notes/hello.txt").await?;
        let second = store.upload(text("hello"), "hello-copy.txt").await?;
        store.upload(text("temporary"), "tmp.txt").await?;
        store.delete_reference(ReferenceId(2)).await?;
        (first, second)
    };

    let store = open_coordinator(&config)?;
    let (record, bytes) = store.fetch_content_by_id(first.id).await?;
    assert_eq!(record, first);
    assert_eq!(bytes, b"hello");
    assert_eq!(store.fetch_by_id(second.id).await?.name, "hello-copy.txt");
    assert!(matches!(
        store.fetch_by_id(ReferenceId(2)).await,
        Err(StoreError::NotFound(_))
    ));

    let stats = store.stats()?;
    assert_eq!(stats.digests, 2);
    assert_eq!(stats.references, 2);
    assert_eq!(stats.next_id, ReferenceId(3));

    let next = store.upload(text("after restart"), "later.txt").await?;
    assert_eq!(next.id, ReferenceId(3));
    Ok(())
}

#[tokio::test]
async fn test_sqlite_backend_survives_restart() -> Result<()> {
    survives_restart(MetadataBackend::Sqlite).await
}

#[tokio::test]
async fn test_snapshot_backend_survives_restart() -> Result<()> {
    survives_restart(MetadataBackend::Snapshot).await
}

#[tokio::test]
async fn test_metadata_files_follow_backend() -> Result<()> {
    let temp = TempDir::new()?;

    let sqlite = config_in(temp.path(), MetadataBackend::Sqlite);
    open_coordinator(&sqlite)?.upload(text("q"), "q").await?;
    assert!(sqlite.digest_index_path().ends_with("digest-index.db"));
    assert!(sqlite.catalog_path().exists());
    assert!(sqlite.sequence_path().exists());

    let snapshot = config_in(&temp.path().join("snap"), MetadataBackend::Snapshot);
    open_coordinator(&snapshot)?.upload(text("s"), "s").await?;
    assert!(snapshot.digest_index_path().ends_with("digest-index.json"));
    assert!(snapshot.digest_index_path().exists());
    Ok(())
}

#[tokio::test]
async fn test_blob_lands_under_storage_key() -> Result<()> {
    let temp = TempDir::new()?;
    let config = config_in(temp.path(), MetadataBackend::Sqlite);
    let store = open_coordinator(&config)?;

    let record = store.upload(text("on disk"), "d.txt").await?;
    let key = StorageKey::for_digest(&record.digest);
    let on_disk = std::fs::read(key.to_path(&config.paths.blob_dir))?;
    assert_eq!(on_disk, b"on disk");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_concurrent_uploads_write_once() -> Result<()> {
    let temp = TempDir::new()?;
    let mut config = config_in(temp.path(), MetadataBackend::Sqlite);
    config.blob.write_delay_ms = 50;
    let store = Arc::new(open_coordinator(&config)?);

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.upload(text("Concurrent Data"), &format!("c{i}.txt")).await
        }));
    }
    for i in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.upload(text(&format!("distinct {i}")), "d.txt").await
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await??.id.0);
    }
    assert_eq!(ids, (0..12).collect::<HashSet<u64>>());

    assert_eq!(blob_files(&config.paths.blob_dir)?, 5);
    let digest = Digest::from_data(b"Concurrent Data");
    assert_eq!(store.fetch_by_digest(&digest).await?, b"Concurrent Data");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_after_restart_take_next_ids() -> Result<()> {
    let temp = TempDir::new()?;
    let config = config_in(temp.path(), MetadataBackend::Sqlite);

    {
        let store = open_coordinator(&config)?;
        for i in 0..5 {
            store.upload(text(&format!("before {i}")), "before.txt").await?;
        }
        store.flush()?;
    }

    let store = Arc::new(open_coordinator(&config)?);
    assert_eq!(store.stats()?.next_id, ReferenceId(5));

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let body = if i < 5 { "shared".to_string() } else { format!("after {i}") };
            store.upload(text(&body), &format!("after{i}.txt")).await
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await??.id.0);
    }
    assert_eq!(ids, (5..15).collect::<HashSet<u64>>());
    assert_eq!(store.stats()?.references, 15);
    Ok(())
}

#[tokio::test]
async fn test_read_only_blobs_reject_uploads() -> Result<()> {
    let temp = TempDir::new()?;
    let mut config = config_in(temp.path(), MetadataBackend::Sqlite);
    config.blob.read_only = true;
    let store = open_coordinator(&config)?;

    let err = store.upload(text("nope"), "n.txt").await.unwrap_err();
    assert!(matches!(err, StoreError::StorageUnavailable(_)));
    assert_eq!(store.stats()?.references, 0);
    Ok(())
}
