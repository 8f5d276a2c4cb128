//! Content addressing primitives for uniqstore.
//!
//! - [`Digest`]: BLAKE3-derived identity of a byte sequence
//! - [`StorageKey`]: where a backend keeps the bytes for a digest
//! - [`BlobStore`]: create/get/delete raw bytes by key
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cas::{BlobStore, Digest, FsBlobStore, StorageKey};
//!
//! let store = FsBlobStore::at_path("/srv/uniqstore/blobs").unwrap();
//!
//! let digest = Digest::from_data(b"hello");
//! let key = StorageKey::for_digest(&digest);
//! store.create(&key, b"hello").unwrap();
//!
//! if let Some(data) = store.get(&key).unwrap() {
//!     println!("{} -> {} bytes", digest, data.len());
//! }
//! ```
//!
//! Nothing in this crate decides whether content is already stored. That
//! decision belongs to the digest index in `uniqstore`.

pub mod blob;
pub mod config;
pub mod digest;
pub mod key;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use config::BlobConfig;
pub use digest::{Digest, DigestError, DIGEST_HEX_LEN};
pub use key::{KeyError, StorageKey};
