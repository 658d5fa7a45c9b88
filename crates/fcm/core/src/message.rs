//! Provider-facing message descriptor.

/// Notification content handed to the delivery client.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Message {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// Destination of a single send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    Topic(String),
    Token(String),
}

impl SendTarget {
    /// Topic name or token, as recorded in delivery results.
    pub fn name(&self) -> &str {
        match self {
            Self::Topic(name) | Self::Token(name) => name,
        }
    }
}

impl std::fmt::Display for SendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic(name) => write!(f, "/topics/{}", name),
            Self::Token(token) => write!(f, "{}", token),
        }
    }
}
