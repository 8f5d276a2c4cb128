//! Configuration loading for uniqstore.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, tables merge key by key):
//! 1. `/etc/uniqstore/config.toml` (system)
//! 2. `~/.config/uniqstore/config.toml` (user)
//! 3. `./uniqstore.toml` or the `--config` path (local override)
//! 4. Environment variables (`UNIQSTORE_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.local/share/uniqstore"
//! blob_dir = "~/.uniqstore/blobs"
//!
//! [bind]
//! host = "0.0.0.0"
//! http_port = 2000
//!
//! [blob]
//! write_delay_ms = 0
//!
//! [metadata]
//! backend = "sqlite"    # or "snapshot"
//!
//! [telemetry]
//! log_level = "info"
//! # otlp_endpoint = "127.0.0.1:4317"
//! ```

pub mod infra;
pub mod loader;

pub use infra::{BindConfig, BlobConfig, MetadataBackend, MetadataConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete uniqstore configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub blob: BlobConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl UniqConfig {
    /// Load configuration from optional path and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::parse_table(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Location of the digest index file for the configured backend.
    pub fn digest_index_path(&self) -> PathBuf {
        self.paths
            .state_dir
            .join(self.metadata_file_name("digest-index"))
    }

    /// Location of the reference catalog file for the configured backend.
    pub fn catalog_path(&self) -> PathBuf {
        self.paths.state_dir.join(self.metadata_file_name("catalog"))
    }

    /// Location of the catalog's id sequence file.
    pub fn sequence_path(&self) -> PathBuf {
        self.paths.state_dir.join(self.metadata_file_name("sequence"))
    }

    fn metadata_file_name(&self, stem: &str) -> String {
        match self.metadata.backend {
            MetadataBackend::Sqlite => format!("{}.db", stem),
            MetadataBackend::Snapshot => format!("{}.json", stem),
        }
    }

    /// Serialize config to a TOML string (for `--print-config`).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|e| format!("# failed to render config: {}\n", e))
    }
}
