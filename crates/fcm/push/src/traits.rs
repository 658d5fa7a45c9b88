//! Delivery client traits.

use fcm_core::{DeliveryResult, Message, SendTarget};

/// Failure of a provider call.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Request could not be sent or the response could not be read.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// Access token could not be obtained.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Provider rejected the call.
    #[error("provider error {status} {code}: {message}")]
    Provider {
        status: u16,
        code: String,
        message: String,
    },
    /// Provider answered with an unexpected body.
    #[error("unexpected provider response: {0}")]
    Decode(String),
    /// Call did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Push provider capability used by the dispatcher.
#[trait_variant::make(Send)]
pub trait DeliveryClient: Send + Sync {
    /// Subscribe tokens to a topic. One result per token, in input order.
    async fn subscribe_to_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<Vec<DeliveryResult>, TransportError>;

    /// Unsubscribe tokens from a topic. One result per token, in input order.
    async fn unsubscribe_from_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<Vec<DeliveryResult>, TransportError>;

    /// Send one message to a topic or token. Returns the provider message ID.
    async fn send_single(
        &self,
        target: &SendTarget,
        message: &Message,
    ) -> Result<String, TransportError>;

    /// Send one message to many tokens. One result per token, in input order.
    ///
    /// A token that fails or times out gets a failed result; only a failure
    /// shared by every token (credentials) fails the whole call.
    async fn send_multicast(
        &self,
        message: &Message,
        tokens: &[String],
    ) -> Result<Vec<DeliveryResult>, TransportError>;

    /// Fetch raw app instance metadata for a token.
    async fn get_app_instance(&self, token: &str) -> Result<serde_json::Value, TransportError>;
}
