//! Target kinds and resolution.

/// Topic every device must be subscribed to for broadcast delivery.
pub const ALL_DEVICES_TOPIC: &str = "all";

/// Maximum tokens per topic subscribe/unsubscribe call.
pub const SUBSCRIPTION_LIMIT: usize = 1000;

/// Maximum tokens per multicast send.
pub const MULTICAST_LIMIT: usize = 100;

/// Who a notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TargetSpec {
    /// Every subscriber of a named topic.
    Topic(String),
    /// An explicit list of delivery tokens.
    Tokens(Vec<String>),
    /// Every device subscribed to [`ALL_DEVICES_TOPIC`].
    AllDevices,
}

impl TargetSpec {
    /// Short name of the variant, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Topic(_) => "topic",
            Self::Tokens(_) => "tokens",
            Self::AllDevices => "all_devices",
        }
    }
}

/// Operation a token list is validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMode {
    Subscribe,
    Unsubscribe,
    Multicast,
}

impl TokenMode {
    /// Provider ceiling for this operation.
    pub fn limit(self) -> usize {
        match self {
            Self::Subscribe | Self::Unsubscribe => SUBSCRIPTION_LIMIT,
            Self::Multicast => MULTICAST_LIMIT,
        }
    }
}

/// Target validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("the number of tokens cannot exceed {limit} (got {actual})")]
    LimitExceeded { limit: usize, actual: usize },
    #[error("target resolves to no recipients")]
    Empty,
    #[error("invalid topic name {0:?}")]
    InvalidTopic(String),
}

/// One token or a list of tokens.
///
/// A single token normalizes to a one-element list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenList(Vec<String>);

impl TokenList {
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for TokenList {
    fn from(token: &str) -> Self {
        Self(vec![token.to_string()])
    }
}

impl From<String> for TokenList {
    fn from(token: String) -> Self {
        Self(vec![token])
    }
}

impl From<Vec<String>> for TokenList {
    fn from(tokens: Vec<String>) -> Self {
        Self(tokens)
    }
}

impl From<&[String]> for TokenList {
    fn from(tokens: &[String]) -> Self {
        Self(tokens.to_vec())
    }
}

impl From<Vec<&str>> for TokenList {
    fn from(tokens: Vec<&str>) -> Self {
        Self(tokens.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for TokenList {
    fn from(tokens: [&str; N]) -> Self {
        Self(tokens.into_iter().map(str::to_string).collect())
    }
}

/// Where a single provider call goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    Topic(String),
    Tokens(Vec<String>),
}

/// Validate a token list for `mode`.
///
/// Duplicates are kept as given; each occurrence is a separate recipient.
pub fn resolve_tokens(
    tokens: impl Into<TokenList>,
    mode: TokenMode,
) -> Result<Vec<String>, TargetError> {
    let tokens = tokens.into().into_vec();

    if tokens.is_empty() {
        return Err(TargetError::Empty);
    }

    let limit = mode.limit();
    if tokens.len() > limit {
        return Err(TargetError::LimitExceeded {
            limit,
            actual: tokens.len(),
        });
    }

    Ok(tokens)
}

/// Validate a topic name against the provider's allowed alphabet.
pub fn resolve_topic(topic: &str) -> Result<String, TargetError> {
    let name = topic.strip_prefix("/topics/").unwrap_or(topic);

    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '%'));

    if !valid {
        return Err(TargetError::InvalidTopic(topic.to_string()));
    }

    Ok(name.to_string())
}

/// Classify a target for sending.
///
/// `AllDevices` becomes a publish to [`ALL_DEVICES_TOPIC`]; subscription to
/// that topic is not checked here.
pub fn resolve_target(target: &TargetSpec) -> Result<ResolvedTarget, TargetError> {
    match target {
        TargetSpec::Topic(name) => resolve_topic(name).map(ResolvedTarget::Topic),
        TargetSpec::AllDevices => Ok(ResolvedTarget::Topic(ALL_DEVICES_TOPIC.to_string())),
        TargetSpec::Tokens(tokens) => {
            resolve_tokens(tokens.as_slice(), TokenMode::Multicast).map(ResolvedTarget::Tokens)
        }
    }
}
