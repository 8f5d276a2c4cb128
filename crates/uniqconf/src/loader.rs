//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, UniqConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only existing files are returned.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local `./uniqstore.toml`.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/uniqstore/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("uniqstore/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("uniqstore.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Deep-merge `overlay` into `base`. Tables merge key by key, anything else is replaced.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a config, filling defaults and expanding paths.
pub fn parse_table(table: toml::Table, origin: &Path) -> Result<UniqConfig, ConfigError> {
    let mut config: UniqConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

    config.paths.state_dir = expand_path(&config.paths.state_dir.to_string_lossy());
    config.paths.blob_dir = expand_path(&config.paths.blob_dir.to_string_lossy());
    Ok(config)
}

/// Apply `UNIQSTORE_*` environment overrides.
pub fn apply_env_overrides(config: &mut UniqConfig, sources: &mut ConfigSources) {
    apply_overrides_with(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary lookup. Split out so tests need not touch the process env.
pub fn apply_overrides_with<F>(config: &mut UniqConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("UNIQSTORE_STATE_DIR") {
        config.paths.state_dir = expand_path(&v);
        sources.env_overrides.push("UNIQSTORE_STATE_DIR".to_string());
    }
    if let Some(v) = lookup("UNIQSTORE_BLOB_DIR") {
        config.paths.blob_dir = expand_path(&v);
        sources.env_overrides.push("UNIQSTORE_BLOB_DIR".to_string());
    }

    if let Some(v) = lookup("UNIQSTORE_HOST") {
        config.bind.host = v;
        sources.env_overrides.push("UNIQSTORE_HOST".to_string());
    }
    if let Some(v) = lookup("UNIQSTORE_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.bind.http_port = port;
            sources.env_overrides.push("UNIQSTORE_HTTP_PORT".to_string());
        }
    }

    if let Some(v) = lookup("UNIQSTORE_BLOB_WRITE_DELAY_MS") {
        if let Ok(ms) = v.parse() {
            config.blob.write_delay_ms = ms;
            sources
                .env_overrides
                .push("UNIQSTORE_BLOB_WRITE_DELAY_MS".to_string());
        }
    }
    if let Some(v) = lookup("UNIQSTORE_METADATA_BACKEND") {
        if let Ok(backend) = v.parse() {
            config.metadata.backend = backend;
            sources
                .env_overrides
                .push("UNIQSTORE_METADATA_BACKEND".to_string());
        }
    }

    if let Some(v) = lookup("UNIQSTORE_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        sources.env_overrides.push("UNIQSTORE_OTLP_ENDPOINT".to_string());
    }
    if let Some(v) = lookup("UNIQSTORE_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("UNIQSTORE_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over everything, as it does for any tracing-based binary
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            match env::var(var_name) {
                Ok(var_value) => PathBuf::from(var_value).join(&stripped[slash_pos + 1..]),
                Err(_) => PathBuf::from(path),
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
