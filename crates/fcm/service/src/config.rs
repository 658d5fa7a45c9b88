use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fcm_storage::{DeviceRegistry, MemoryRegistry, SqliteStorage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config file not found at {0}")]
    NotFound(PathBuf),
    #[error("Invalid provider credentials: {0}")]
    Credentials(color_eyre::eyre::Report),
    #[error("Failed to initialize storage: {0}")]
    Storage(color_eyre::eyre::Report),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service account key file for the push provider.
    pub credentials_path: PathBuf,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub device_registry: RegistryKind,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

/// Device registry implementations selectable from configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    #[default]
    Sqlite,
    Memory,
}

impl RegistryKind {
    /// Build the registry. `Sqlite` shares the notification database.
    pub fn build(self, storage: &SqliteStorage) -> Arc<dyn DeviceRegistry> {
        match self {
            Self::Sqlite => Arc::new(storage.clone()),
            Self::Memory => Arc::new(MemoryRegistry::new()),
        }
    }
}

fn default_database_url() -> String {
    "fcm.db".to_string()
}

fn default_send_timeout() -> u64 {
    30
}

impl Config {
    /// Load a config file. `DATABASE_URL` overrides `database_url`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}
