//! Blob backend configuration.
//!
//! Default root: `~/.uniqstore/blobs`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the filesystem blob backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Directory blobs live under. Temp files go to `{root}/tmp/`.
    pub root: PathBuf,

    /// Artificial delay before every physical write, in milliseconds.
    /// Emulates a slow storage device.
    #[serde(default)]
    pub write_delay_ms: u64,

    /// Read-only mode - `create` and `delete` are rejected.
    #[serde(default)]
    pub read_only: bool,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: default_blob_root(),
            write_delay_ms: 0,
            read_only: false,
        }
    }
}

fn default_blob_root() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".uniqstore").join("blobs"))
        .unwrap_or_else(|| PathBuf::from(".uniqstore/blobs"))
}

impl BlobConfig {
    /// Create a config with a specific root.
    pub fn with_root(path: impl Into<PathBuf>) -> Self {
        Self {
            root: path.into(),
            write_delay_ms: 0,
            read_only: false,
        }
    }

    /// Create a read-only config with a specific root.
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            root: path.into(),
            write_delay_ms: 0,
            read_only: true,
        }
    }

    /// Builder: set the artificial write delay.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms)
    }

    /// Scratch directory for in-flight writes.
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }
}
