//! Remote Store Configuration
//!
//! Connection settings for the hosted backend, persisted as a JSON file
//! next to the application data or read from the environment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, DomainResult};

/// Environment variable holding the project base URL
pub const ENV_URL: &str = "DK_TODO_URL";
/// Environment variable holding the public (anon) API key
pub const ENV_ANON_KEY: &str = "DK_TODO_ANON_KEY";

fn default_table() -> String {
    "todos".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

/// Connection settings for the hosted backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the hosted project, e.g. `https://xyz.example.co`
    pub url: String,
    /// Public (anon) API key sent with every request
    pub anon_key: String,
    /// Table holding the todo rows
    #[serde(default = "default_table")]
    pub table: String,
    /// Change-feed polling interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        RemoteConfig {
            url: url.into(),
            anon_key: anon_key.into(),
            table: default_table(),
            poll_interval_secs: default_poll_interval(),
        }
    }

    /// Read settings from `DK_TODO_URL` / `DK_TODO_ANON_KEY`
    pub fn from_env() -> DomainResult<Self> {
        let url = std::env::var(ENV_URL)
            .map_err(|_| DomainError::Validation(format!("{} is not set", ENV_URL)))?;
        let anon_key = std::env::var(ENV_ANON_KEY)
            .map_err(|_| DomainError::Validation(format!("{} is not set", ENV_ANON_KEY)))?;
        Ok(RemoteConfig::new(url, anon_key))
    }

    /// Load settings from a JSON config file
    pub fn load(path: &Path) -> DomainResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DomainError::Validation(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            DomainError::Validation(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Persist settings as a JSON config file
    pub fn save(&self, path: &Path) -> DomainResult<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| DomainError::Validation(format!("failed to encode config: {}", e)))?;
        std::fs::write(path, raw).map_err(|e| {
            DomainError::Validation(format!("failed to write {}: {}", path.display(), e))
        })
    }
}
