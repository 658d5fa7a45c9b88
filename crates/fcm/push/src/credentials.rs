//! Service account credentials and OAuth2 access tokens.

use color_eyre::eyre::WrapErr as _;

use crate::TransportError;

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const SCOPES: &str = "https://www.googleapis.com/auth/firebase.messaging \
                      https://www.googleapis.com/auth/cloud-platform";

/// Refresh this long before the provider-reported expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Google service account key file.
#[derive(Clone, serde::Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccount {
    /// Load a service account key file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> color_eyre::eyre::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read credentials from {}", path.display()))?;

        Self::from_json(&json)
    }

    /// Parse a service account key from JSON.
    pub fn from_json(json: &str) -> color_eyre::eyre::Result<Self> {
        let account: Self =
            serde_json::from_str(json).wrap_err("failed to parse service account")?;

        for (field, value) in [
            ("project_id", &account.project_id),
            ("client_email", &account.client_email),
            ("private_key", &account.private_key),
        ] {
            if value.trim().is_empty() {
                color_eyre::eyre::bail!("service account field {} is empty", field);
            }
        }

        Ok(account)
    }
}

#[derive(serde::Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// Signs JWT assertions and caches the exchanged access token.
pub(crate) struct TokenSource {
    account: ServiceAccount,
    key: jsonwebtoken::EncodingKey,
    cached: tokio::sync::Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub(crate) fn new(account: ServiceAccount) -> color_eyre::eyre::Result<Self> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .wrap_err("invalid service account private key")?;

        Ok(Self {
            account,
            key,
            cached: tokio::sync::Mutex::new(None),
        })
    }

    pub(crate) fn project_id(&self) -> &str {
        &self.account.project_id
    }

    /// Get a valid access token, exchanging a new assertion when needed.
    pub(crate) async fn access_token(
        &self,
        http: &reqwest::Client,
    ) -> Result<String, TransportError> {
        let mut cached = self.cached.lock().await;
        let now = chrono::Utc::now();

        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > now) {
            return Ok(token.value.clone());
        }

        tracing::debug!(client_email = %self.account.client_email, "requesting access token");

        let assertion = self.assertion(now)?;
        let response = http
            .post(&self.account.token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = (token.expires_in - REFRESH_MARGIN_SECS).max(0);

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + chrono::Duration::seconds(lifetime),
        });

        Ok(token.access_token)
    }

    fn assertion(&self, now: chrono::DateTime<chrono::Utc>) -> Result<String, TransportError> {
        let iat = now.timestamp();
        let claims = Claims {
            iss: &self.account.client_email,
            scope: SCOPES,
            aud: &self.account.token_uri,
            iat,
            exp: iat + 3600,
        };

        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
            &claims,
            &self.key,
        )
        .map_err(|e| TransportError::Auth(e.to_string()))
    }
}
