use std::sync::Arc;

use fcm_push::FcmClient;
use fcm_storage::{DeviceRegistry, SqliteStorage};

use crate::config::{Config, ConfigError};
use crate::dispatcher::Dispatcher;
use crate::manager::FcmManager;

/// Production wiring: SQLite storage plus the FCM HTTP client.
pub struct FcmRuntime {
    storage: SqliteStorage,
    dispatcher: Dispatcher<SqliteStorage, FcmClient>,
    manager: FcmManager<FcmClient>,
}

impl FcmRuntime {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let client = FcmClient::from_file(&config.credentials_path, config.send_timeout())
            .map_err(ConfigError::Credentials)?;

        let storage = SqliteStorage::new(&config.database_url).map_err(ConfigError::Storage)?;
        storage.run_migrations().map_err(ConfigError::Storage)?;

        let registry = config.device_registry.build(&storage);

        tracing::info!(
            database_url = %config.database_url,
            registry = ?config.device_registry,
            "fcm runtime initialized"
        );

        Ok(Self::assemble(storage, client, registry, config))
    }

    /// Replace the device registry chosen by configuration, for
    /// registries that [`RegistryKind`](crate::RegistryKind) cannot build.
    pub fn with_registry(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.manager = FcmManager::new(self.manager.client().clone(), registry);
        self
    }

    fn assemble(
        storage: SqliteStorage,
        client: FcmClient,
        registry: Arc<dyn DeviceRegistry>,
        config: &Config,
    ) -> Self {
        let dispatcher = Dispatcher::new(storage.clone(), client.clone())
            .with_send_timeout(config.send_timeout());
        let manager = FcmManager::new(client, registry);

        Self {
            storage,
            dispatcher,
            manager,
        }
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn dispatcher(&self) -> &Dispatcher<SqliteStorage, FcmClient> {
        &self.dispatcher
    }

    pub fn manager(&self) -> &FcmManager<FcmClient> {
        &self.manager
    }
}
