//! Repository configuration
//!
//! Loaded from YAML, with a few environment overrides for deployment:
//!
//! ```yaml
//! db_path: /var/lib/tdrepo/things.db
//! base_uri: http://localhost:8080/td
//! default_lifetime_secs: 86400
//! default_endpoint: http://example.org/
//! log_directory: /var/log/tdrepo
//! log_level: info
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Default document lifetime: 24 hours
pub const DEFAULT_LIFETIME_SECS: u64 = 86_400;

/// Endpoint recorded when a registration names none
pub const DEFAULT_ENDPOINT: &str = "http://example.org/";

/// Configuration for a [`ThingRepository`](crate::repository::ThingRepository)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// SQLite database file; `None` keeps everything in memory
    pub db_path: Option<PathBuf>,
    /// Collection URI that document identifiers are appended to
    pub base_uri: String,
    /// Lifetime applied when a registration has no usable `lt`
    pub default_lifetime_secs: u64,
    /// Endpoint applied when a registration has no `ep`
    pub default_endpoint: String,
    /// Largest accepted document body
    pub max_document_bytes: usize,
    /// How many fresh identifiers to try before giving up on collisions
    pub id_attempts: u32,
    /// Directory for rotated log files
    pub log_directory: Option<PathBuf>,
    /// Default log level when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            base_uri: "http://localhost:8080/td".to_string(),
            default_lifetime_secs: DEFAULT_LIFETIME_SECS,
            default_endpoint: DEFAULT_ENDPOINT.to_string(),
            max_document_bytes: 10 * 1024 * 1024,
            id_attempts: 8,
            log_directory: None,
            log_level: "info".to_string(),
        }
    }
}

impl RepositoryConfig {
    /// Parse a YAML document; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse config YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file, then apply environment overrides
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading repository config from {:?}", path);
        let yaml = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&yaml)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `TDREPO_DB_PATH`, `TDREPO_BASE_URI` and `TDREPO_DEFAULT_LIFETIME`
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("TDREPO_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Ok(uri) = std::env::var("TDREPO_BASE_URI") {
            self.base_uri = uri;
        }
        if let Ok(lifetime) = std::env::var("TDREPO_DEFAULT_LIFETIME") {
            self.default_lifetime_secs = lifetime.trim().parse().map_err(|_| {
                Error::config(format!("TDREPO_DEFAULT_LIFETIME is not a number: {}", lifetime))
            })?;
        }
        self.validate()
    }

    /// Reject settings the repository cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.default_lifetime_secs == 0 {
            return Err(Error::config("default_lifetime_secs must be positive"));
        }
        if self.id_attempts == 0 {
            return Err(Error::config("id_attempts must be at least 1"));
        }
        if !(self.base_uri.starts_with("http://") || self.base_uri.starts_with("https://")) {
            return Err(Error::config(format!(
                "base_uri must be an http(s) URI: {}",
                self.base_uri
            )));
        }
        Ok(())
    }
}
