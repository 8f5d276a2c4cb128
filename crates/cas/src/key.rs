//! StorageKey: where the blob backend keeps the bytes for a digest.
//!
//! Keys are derived from the digest alone (`ab/cdef....txt`), so the
//! coordinator can compute one without a lookup. The digest index remains
//! the source of truth for whether a key's bytes actually exist.

use crate::digest::Digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Extension for every blob. Only text content is stored.
pub const BLOB_EXTENSION: &str = "txt";

/// An opaque, relative storage location understood by a [`crate::BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageKey(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("storage key is empty")]
    Empty,

    #[error("storage key escapes the blob root: {0}")]
    Escapes(String),
}

impl StorageKey {
    /// Derive the key for a digest: two-char shard directory, remainder as filename.
    pub fn for_digest(digest: &Digest) -> Self {
        Self(format!(
            "{}/{}.{}",
            digest.prefix(),
            digest.remainder(),
            BLOB_EXTENSION
        ))
    }

    /// Validate a key read back from persisted state.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        if s.is_empty() {
            return Err(KeyError::Empty);
        }
        let path = Path::new(s);
        let safe = path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(KeyError::Escapes(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve against a backend root directory.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for StorageKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.0
    }
}
