//! Direct topic, token, and device operations.

use std::sync::Arc;

use fcm_core::{
    ALL_DEVICES_TOPIC, DeliveryResult, Message, SendTarget, TargetError, TokenList, TokenMode,
    resolve_tokens, resolve_topic,
};
use fcm_push::{DeliveryClient, TransportError};
use fcm_storage::DeviceRegistry;

/// Error from a direct operation.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Validation(#[from] TargetError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("device registry error: {0}")]
    Registry(color_eyre::eyre::Report),
}

/// App instance metadata for one token.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub token: String,
    /// Raw provider metadata, or the lookup error.
    pub info: Result<serde_json::Value, String>,
}

/// Unlogged access to the delivery client and device registry.
///
/// Sends made here are not recorded; use the dispatcher for that.
pub struct FcmManager<C> {
    client: C,
    registry: Arc<dyn DeviceRegistry>,
}

impl<C> FcmManager<C> {
    /// Create a new manager.
    pub fn new(client: C, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { client, registry }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn registry(&self) -> &dyn DeviceRegistry {
        self.registry.as_ref()
    }

    /// Register a device's delivery token.
    pub fn register_device(&self, device_key: &str, token: &str) -> Result<(), ManagerError> {
        tracing::info!(device_key, "registering device");

        self.registry
            .register(device_key, token)
            .map_err(ManagerError::Registry)
    }

    /// Remove a device. Returns whether it was registered.
    pub fn unregister_device(&self, device_key: &str) -> Result<bool, ManagerError> {
        tracing::info!(device_key, "unregistering device");

        self.registry
            .unregister(device_key)
            .map_err(ManagerError::Registry)
    }

    /// Resolve device keys to delivery tokens, skipping unknown devices.
    pub fn device_tokens(&self, device_keys: &[&str]) -> Result<Vec<String>, ManagerError> {
        self.registry
            .lookup_many(device_keys)
            .map_err(ManagerError::Registry)
    }
}

impl<C: DeliveryClient> FcmManager<C> {
    /// Subscribe up to 1000 tokens to a topic.
    pub async fn subscribe_to_topic(
        &self,
        topic: &str,
        tokens: impl Into<TokenList>,
    ) -> Result<Vec<DeliveryResult>, ManagerError> {
        let topic = resolve_topic(topic)?;
        let tokens = resolve_tokens(tokens, TokenMode::Subscribe)?;

        Ok(self.client.subscribe_to_topic(&topic, &tokens).await?)
    }

    /// Unsubscribe up to 1000 tokens from a topic.
    pub async fn unsubscribe_from_topic(
        &self,
        topic: &str,
        tokens: impl Into<TokenList>,
    ) -> Result<Vec<DeliveryResult>, ManagerError> {
        let topic = resolve_topic(topic)?;
        let tokens = resolve_tokens(tokens, TokenMode::Unsubscribe)?;

        Ok(self.client.unsubscribe_from_topic(&topic, &tokens).await?)
    }

    /// Send to every subscriber of a topic. Returns the message ID.
    pub async fn send_to_topic(&self, topic: &str, message: &Message) -> Result<String, ManagerError> {
        let target = SendTarget::Topic(resolve_topic(topic)?);

        Ok(self.client.send_single(&target, message).await?)
    }

    /// Send to up to 100 tokens. One result per token, in input order.
    pub async fn send_to_tokens(
        &self,
        tokens: impl Into<TokenList>,
        message: &Message,
    ) -> Result<Vec<DeliveryResult>, ManagerError> {
        let tokens = resolve_tokens(tokens, TokenMode::Multicast)?;

        Ok(self.client.send_multicast(message, &tokens).await?)
    }

    /// Send to every device subscribed to the `all` topic.
    pub async fn send_to_all_devices(&self, message: &Message) -> Result<String, ManagerError> {
        let target = SendTarget::Topic(ALL_DEVICES_TOPIC.to_string());

        Ok(self.client.send_single(&target, message).await?)
    }

    /// Fetch app instance metadata token by token.
    ///
    /// A failed lookup yields an error placeholder; the result always has
    /// one entry per input token.
    pub async fn get_device_info(&self, tokens: impl Into<TokenList>) -> Vec<DeviceInfo> {
        let tokens = tokens.into().into_vec();
        let mut infos = Vec::with_capacity(tokens.len());

        for token in tokens {
            let info = match self.client.get_app_instance(&token).await {
                Ok(raw) => Ok(raw),
                Err(e) => {
                    tracing::warn!(error = %e, "device info lookup failed");
                    Err(e.to_string())
                }
            };
            infos.push(DeviceInfo { token, info });
        }

        infos
    }
}
