//! uniqstore: a deduplicating, content-addressed text store served over HTTP.
//!
//! Identical uploads are stored once. Every upload still gets its own numeric
//! reference, and content is retrievable by reference id or by digest.

pub mod catalog;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod locks;
pub mod persistence;
pub mod telemetry;
pub mod web;

pub use catalog::{ReferenceCatalog, ReferenceId, ReferenceRecord};
pub use coordinator::{StoreCoordinator, StoreStats, UploadSource};
pub use error::{StoreError, StoreResult};
pub use index::{DigestIndex, IndexError};

use anyhow::{Context, Result};
use cas::{BlobStore, FsBlobStore};
use std::sync::Arc;
use uniqconf::UniqConfig;

/// Open the filesystem blob store and the configured metadata backend.
pub fn open_coordinator(config: &UniqConfig) -> Result<StoreCoordinator> {
    let state_dir = &config.paths.state_dir;
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("failed to create state directory {}", state_dir.display()))?;

    let blob_config = cas::BlobConfig {
        root: config.paths.blob_dir.clone(),
        write_delay_ms: config.blob.write_delay_ms,
        read_only: config.blob.read_only,
    };
    let blobs: Arc<dyn BlobStore> =
        Arc::new(FsBlobStore::new(blob_config).context("failed to open blob store")?);

    let backend = config.metadata.backend;
    let index = DigestIndex::new(
        persistence::open_kv(backend, &config.digest_index_path())
            .context("failed to open digest index")?,
    );
    let catalog = ReferenceCatalog::open(
        persistence::open_kv(backend, &config.catalog_path())
            .context("failed to open reference catalog")?,
        persistence::open_kv(backend, &config.sequence_path())
            .context("failed to open reference sequence")?,
    )
    .context("failed to load reference catalog")?;

    let coordinator = StoreCoordinator::new(blobs, index, catalog);
    let stats = coordinator.stats()?;
    tracing::info!(
        backend = ?backend,
        state_dir = %state_dir.display(),
        blob_dir = %config.paths.blob_dir.display(),
        digests = stats.digests,
        references = stats.references,
        next_id = %stats.next_id,
        "store opened"
    );
    Ok(coordinator)
}
