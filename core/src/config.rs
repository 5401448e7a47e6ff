//! Client configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::auth::{CredentialProvider, NoCredentials, TokenFile};
use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3001";

/// How long an unsubscribed cache entry is kept before eviction.
pub const DEFAULT_KEEP_UNUSED_FOR_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub base_url: String,
    pub keep_unused_for_secs: u64,
    /// File holding the bearer token. Absent means requests go out
    /// unauthenticated.
    pub token_file: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            keep_unused_for_secs: DEFAULT_KEEP_UNUSED_FOR_SECS,
            token_file: None,
        }
    }
}

impl ApiConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn keep_unused_for(&self) -> Duration {
        Duration::from_secs(self.keep_unused_for_secs)
    }

    pub fn credentials(&self) -> Arc<dyn CredentialProvider> {
        match &self.token_file {
            Some(path) => Arc::new(TokenFile::new(path)),
            None => Arc::new(NoCredentials),
        }
    }
}
