//! Configuration sections. All of these are fixed for the life of the process.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for metadata and blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the digest index and reference catalog.
    /// Default: ~/.local/share/uniqstore
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,

    /// Root of the filesystem blob store.
    /// Default: ~/.uniqstore/blobs
    #[serde(default = "PathsConfig::default_blob_dir")]
    pub blob_dir: PathBuf,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/uniqstore"))
            .unwrap_or_else(|| PathBuf::from(".local/share/uniqstore"))
    }

    fn default_blob_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".uniqstore/blobs"))
            .unwrap_or_else(|| PathBuf::from(".uniqstore/blobs"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            blob_dir: Self::default_blob_dir(),
        }
    }
}

/// HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// Default: 2000
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_http_port() -> u16 {
        2000
    }

    /// `host:port` suitable for a socket bind.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            http_port: Self::default_http_port(),
        }
    }
}

/// Blob backend behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Artificial delay before each physical write.
    /// Default: 0
    #[serde(default)]
    pub write_delay_ms: u64,

    /// Refuse writes (serve existing content only).
    #[serde(default)]
    pub read_only: bool,
}

/// How the digest index and reference catalog are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    /// SQLite database in WAL mode, one row per key.
    #[default]
    Sqlite,
    /// Whole-map JSON snapshot rewritten on every mutation.
    Snapshot,
}

impl std::str::FromStr for MetadataBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(format!("unknown metadata backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub backend: MetadataBackend,
}

/// Logging and trace export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. When unset only local logging is configured.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Log filter directive (trace, debug, info, warn, error, or an EnvFilter string).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: Self::default_log_level(),
        }
    }
}
