//! Recording delivery client for tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fcm_core::{DeliveryResult, Message, SendTarget};
use fcm_push::{DeliveryClient, TransportError};
use parking_lot::Mutex;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Delivery client that fails for configured tokens/topics and counts calls.
#[derive(Clone, Default)]
pub(crate) struct MockClient {
    failing: Arc<HashSet<String>>,
    reject_calls: bool,
    delay: Option<Duration>,
    token_delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<(String, Message)>>>,
    subscriptions: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl MockClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Tokens or topics whose delivery fails.
    pub(crate) fn failing(mut self, targets: &[&str]) -> Self {
        self.failing = Arc::new(targets.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Fail every call as a whole (e.g. bad credentials).
    pub(crate) fn rejecting(mut self) -> Self {
        self.reject_calls = true;
        self
    }

    /// Delay every send.
    pub(crate) fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay each token of a multicast, as a provider sending one by one.
    pub(crate) fn slow_per_token(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Targets of single sends, in call order.
    pub(crate) fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().clone()
    }

    pub(crate) fn subscriptions(&self) -> Vec<(String, Vec<String>)> {
        self.subscriptions.lock().clone()
    }

    async fn begin(&self) -> Result<usize, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_calls {
            return Err(TransportError::Auth("invalid_grant".into()));
        }
        Ok(n)
    }

    fn provider_error(&self, target: &str) -> TransportError {
        TransportError::Provider {
            status: 404,
            code: "UNREGISTERED".into(),
            message: format!("{} is not registered", target),
        }
    }

    fn topic_results(&self, tokens: &[String]) -> Vec<DeliveryResult> {
        tokens
            .iter()
            .map(|t| {
                if self.failing.contains(t) {
                    DeliveryResult::failure(t.as_str(), "NOT_FOUND")
                } else {
                    DeliveryResult::accepted(t.as_str())
                }
            })
            .collect()
    }
}

impl DeliveryClient for MockClient {
    async fn subscribe_to_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<Vec<DeliveryResult>, TransportError> {
        self.begin().await?;
        self.subscriptions
            .lock()
            .push((topic.to_string(), tokens.to_vec()));
        Ok(self.topic_results(tokens))
    }

    async fn unsubscribe_from_topic(
        &self,
        _topic: &str,
        tokens: &[String],
    ) -> Result<Vec<DeliveryResult>, TransportError> {
        self.begin().await?;
        Ok(self.topic_results(tokens))
    }

    async fn send_single(
        &self,
        target: &SendTarget,
        message: &Message,
    ) -> Result<String, TransportError> {
        let n = self.begin().await?;
        self.sent
            .lock()
            .push((target.name().to_string(), message.clone()));

        if self.failing.contains(target.name()) {
            return Err(self.provider_error(target.name()));
        }
        Ok(format!("projects/demo/messages/{}", n))
    }

    async fn send_multicast(
        &self,
        message: &Message,
        tokens: &[String],
    ) -> Result<Vec<DeliveryResult>, TransportError> {
        let n = self.begin().await?;
        let mut results = Vec::with_capacity(tokens.len());

        for (i, token) in tokens.iter().enumerate() {
            if let Some(delay) = self.token_delay {
                tokio::time::sleep(delay).await;
            }
            self.sent.lock().push((token.clone(), message.clone()));

            results.push(if self.failing.contains(token) {
                DeliveryResult::failure(token.as_str(), self.provider_error(token))
            } else {
                DeliveryResult::success(token.as_str(), format!("projects/demo/messages/{}-{}", n, i))
            });
        }

        Ok(results)
    }

    async fn get_app_instance(&self, token: &str) -> Result<serde_json::Value, TransportError> {
        self.begin().await?;

        if self.failing.contains(token) {
            return Err(self.provider_error(token));
        }
        Ok(serde_json::json!({
            "application": "com.example.app",
            "platform": "ANDROID",
            "rel": { "topics": { "all": {} } },
        }))
    }
}
