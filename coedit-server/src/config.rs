//! Process configuration.
//!
//! Read from an optional TOML file; every field has a default, so an empty
//! file (or none at all) yields a runnable single-process setup with
//! in-memory stores.
//!
//! ```toml
//! internal_secret = "change-me"
//!
//! [realtime]
//! bind_addr = "0.0.0.0:9090"
//!
//! [storage]
//! backend = "rocksdb"
//! path = "/var/lib/coedit"
//!
//! [versions]
//! backend = "remote"
//! base_url = "http://versionservice:8083"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use coedit_collab::{RealtimeConfig, RemoteConfig, StoreConfig};
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "COEDIT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0} requires a base_url")]
    MissingBaseUrl(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Rocksdb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceBackend {
    #[default]
    Memory,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    pub bind_addr: String,
    pub broadcast_capacity: usize,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        let defaults = RealtimeConfig::default();
        Self {
            bind_addr: defaults.bind_addr,
            broadcast_capacity: defaults.broadcast_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub bind_addr: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8082".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackend,
    pub path: PathBuf,
    pub sync_writes: bool,
}

impl Default for StorageSection {
    fn default() -> Self {
        let defaults = StoreConfig::default();
        Self {
            backend: StorageBackend::Memory,
            path: defaults.path,
            sync_writes: defaults.sync_writes,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VersionsSection {
    pub backend: ServiceBackend,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccountsSection {
    pub backend: ServiceBackend,
    pub base_url: Option<String>,
    /// Usernames known to the in-memory directory.
    pub seed: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub timeout_ms: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self { timeout_ms: 3000 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Shared secret for service-to-service endpoints. Unset disables them.
    pub internal_secret: Option<String>,
    pub realtime: RealtimeSection,
    pub http: HttpSection,
    pub storage: StorageSection,
    pub versions: VersionsSection,
    pub accounts: AccountsSection,
    pub remote: RemoteSection,
}

impl ServerConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// `--config <path>` wins over `COEDIT_CONFIG`; with neither, defaults.
    pub fn load(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let config = match config_path(args) {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                Self::from_toml_file(path)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.versions.backend == ServiceBackend::Remote && self.versions.base_url.is_none() {
            return Err(ConfigError::MissingBaseUrl("[versions]"));
        }
        if self.accounts.backend == ServiceBackend::Remote && self.accounts.base_url.is_none() {
            return Err(ConfigError::MissingBaseUrl("[accounts]"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.remote.timeout_ms)
    }

    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            bind_addr: self.realtime.bind_addr.clone(),
            broadcast_capacity: self.realtime.broadcast_capacity,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.storage.path.clone(),
            sync_writes: self.storage.sync_writes,
            ..StoreConfig::default()
        }
    }

    /// Client settings for a remote service at `base_url`.
    pub fn remote_config(&self, base_url: &str) -> RemoteConfig {
        RemoteConfig {
            base_url: base_url.to_string(),
            timeout: self.timeout(),
            internal_secret: self.internal_secret.clone(),
        }
    }
}

fn config_path(args: impl IntoIterator<Item = String>) -> Option<PathBuf> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var_os(CONFIG_ENV).map(PathBuf::from)
}
