//! FCM push implementation over the HTTP v1 API.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::WrapErr as _;
use fcm_core::{DeliveryResult, Message, SendTarget};
use reqwest::Url;
use serde_json::Value;

use crate::credentials::TokenSource;
use crate::{DeliveryClient, ServiceAccount, TransportError};

const FCM_ENDPOINT: &str = "https://fcm.googleapis.com/v1";
const IID_ENDPOINT: &str = "https://iid.googleapis.com";

/// FCM client authenticated with a service account.
#[derive(Clone)]
pub struct FcmClient {
    http: reqwest::Client,
    tokens: Arc<TokenSource>,
    fcm_endpoint: Url,
    iid_endpoint: Url,
    timeout: Duration,
}

impl FcmClient {
    /// Create a new FCM client. Every request, and every token of a
    /// multicast, is bounded by `timeout`.
    pub fn new(account: ServiceAccount, timeout: Duration) -> color_eyre::eyre::Result<Self> {
        let tokens = TokenSource::new(account)?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("failed to create HTTP client")?;

        Ok(Self {
            http,
            tokens: Arc::new(tokens),
            fcm_endpoint: Url::parse(FCM_ENDPOINT).wrap_err("invalid FCM endpoint")?,
            iid_endpoint: Url::parse(IID_ENDPOINT).wrap_err("invalid IID endpoint")?,
            timeout,
        })
    }

    /// Create a new FCM client from a service account key file.
    pub fn from_file(
        path: impl AsRef<std::path::Path>,
        timeout: Duration,
    ) -> color_eyre::eyre::Result<Self> {
        Self::new(ServiceAccount::from_file(path)?, timeout)
    }

    /// Point the client at different API hosts (emulators, proxies).
    pub fn with_endpoints(mut self, fcm: Url, iid: Url) -> Self {
        self.fcm_endpoint = fcm;
        self.iid_endpoint = iid;
        self
    }

    async fn bearer(&self) -> Result<String, TransportError> {
        self.tokens.access_token(&self.http).await
    }

    async fn send_with_bearer(
        &self,
        bearer: &str,
        target: &SendTarget,
        message: &Message,
    ) -> Result<String, TransportError> {
        let url = endpoint(
            &self.fcm_endpoint,
            &["projects", self.tokens.project_id(), "messages:send"],
        )?;

        let response = self
            .http
            .post(url)
            .bearer_auth(bearer)
            .json(&send_request(target, message))
            .send()
            .await?;

        let body: Value = read_json(response).await?;
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Decode(format!("missing message name: {}", body)))?;

        tracing::debug!(to = %target, message_id = name, "message sent");

        Ok(name.to_string())
    }

    async fn manage_topic(
        &self,
        action: &str,
        topic: &str,
        tokens: &[String],
    ) -> Result<Vec<DeliveryResult>, TransportError> {
        let bearer = self.bearer().await?;
        let method = format!("v1:{}", action);
        let url = endpoint(&self.iid_endpoint, &["iid", method.as_str()])?;

        let response = self
            .http
            .post(url)
            .bearer_auth(bearer)
            .header("access_token_auth", "true")
            .json(&serde_json::json!({
                "to": format!("/topics/{}", topic),
                "registration_tokens": tokens,
            }))
            .send()
            .await?;

        let body: Value = read_json(response).await?;

        tracing::debug!(topic, action, tokens = tokens.len(), "topic membership updated");

        batch_results(tokens, &body)
    }
}

impl DeliveryClient for FcmClient {
    async fn subscribe_to_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<Vec<DeliveryResult>, TransportError> {
        self.manage_topic("batchAdd", topic, tokens).await
    }

    async fn unsubscribe_from_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<Vec<DeliveryResult>, TransportError> {
        self.manage_topic("batchRemove", topic, tokens).await
    }

    async fn send_single(
        &self,
        target: &SendTarget,
        message: &Message,
    ) -> Result<String, TransportError> {
        let bearer = self.bearer().await?;
        self.send_with_bearer(&bearer, target, message).await
    }

    async fn send_multicast(
        &self,
        message: &Message,
        tokens: &[String],
    ) -> Result<Vec<DeliveryResult>, TransportError> {
        // Only a credential failure fails the whole call
        let bearer = self.bearer().await?;
        let mut results = Vec::with_capacity(tokens.len());

        for token in tokens {
            let target = SendTarget::Token(token.clone());
            let send = self.send_with_bearer(&bearer, &target, message);

            let result = match tokio::time::timeout(self.timeout, send).await {
                Ok(Ok(message_id)) => DeliveryResult::success(token.as_str(), message_id),
                Ok(Err(e)) => DeliveryResult::failure(token.as_str(), e),
                Err(_) => {
                    tracing::warn!(timeout = ?self.timeout, "token send timed out");
                    DeliveryResult::failure(token.as_str(), TransportError::Timeout(self.timeout))
                }
            };
            results.push(result);
        }

        Ok(results)
    }

    async fn get_app_instance(&self, token: &str) -> Result<Value, TransportError> {
        let bearer = self.bearer().await?;
        let mut url = endpoint(&self.iid_endpoint, &["iid", "info", token])?;
        url.query_pairs_mut().append_pair("details", "true");

        let response = self
            .http
            .get(url)
            .bearer_auth(bearer)
            .header("access_token_auth", "true")
            .send()
            .await?;

        read_json(response).await
    }
}

/// Append path segments to an API base URL, escaping each one.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, TransportError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| TransportError::Decode(format!("endpoint {} cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// HTTP v1 `messages:send` body.
fn send_request(target: &SendTarget, message: &Message) -> Value {
    let mut wire = serde_json::json!({ "notification": message });
    match target {
        SendTarget::Topic(topic) => wire["topic"] = Value::from(topic.as_str()),
        SendTarget::Token(token) => wire["token"] = Value::from(token.as_str()),
    }
    serde_json::json!({ "message": wire })
}

async fn read_json(response: reqwest::Response) -> Result<Value, TransportError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(provider_error(status.as_u16(), &body));
    }

    serde_json::from_str(&body).map_err(|e| TransportError::Decode(format!("{}: {}", e, body)))
}

/// Decode an error body from either the v1 API or the IID API.
fn provider_error(status: u16, body: &str) -> TransportError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let (code, message) = match error {
        // IID: {"error": "InvalidToken"}
        Some(Value::String(code)) => (code.clone(), code.clone()),
        // v1: {"error": {"code": 404, "message": "...", "status": "NOT_FOUND", "details": [...]}}
        Some(err) => {
            let code = err
                .get("details")
                .and_then(Value::as_array)
                .and_then(|details| {
                    details
                        .iter()
                        .find_map(|d| d.get("errorCode").and_then(Value::as_str))
                })
                .or_else(|| err.get("status").and_then(Value::as_str))
                .unwrap_or("UNKNOWN");
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            (code.to_string(), message.to_string())
        }
        None => ("UNKNOWN".to_string(), body.to_string()),
    };

    TransportError::Provider {
        status,
        code,
        message,
    }
}

/// Map an IID batch response onto the tokens it was sent for.
fn batch_results(tokens: &[String], body: &Value) -> Result<Vec<DeliveryResult>, TransportError> {
    let items = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::Decode(format!("missing batch results: {}", body)))?;

    if items.len() != tokens.len() {
        return Err(TransportError::Decode(format!(
            "expected {} batch results, got {}",
            tokens.len(),
            items.len()
        )));
    }

    Ok(tokens
        .iter()
        .zip(items)
        .map(|(token, item)| match item.get("error").and_then(Value::as_str) {
            Some(error) => DeliveryResult::failure(token.as_str(), error),
            None => DeliveryResult::accepted(token.as_str()),
        })
        .collect())
}
