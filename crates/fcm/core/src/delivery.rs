//! Delivery results and log entries.

/// Outcome of one provider call against one recipient (token or topic).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeliveryResult {
    /// Token or topic name the call addressed.
    pub target: String,
    /// Provider message ID (if accepted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Error description (if failed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryResult {
    /// Create a successful result carrying the provider message ID.
    pub fn success(target: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    /// Create a successful result for calls that return no message ID.
    pub fn accepted(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            message_id: None,
            error: None,
        }
    }

    /// Create a failed result.
    pub fn failure(target: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            target: target.into(),
            message_id: None,
            error: Some(error.to_string()),
        }
    }

    /// Check if the call succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn status(&self) -> LogStatus {
        if self.is_success() {
            LogStatus::Success
        } else {
            LogStatus::Failure
        }
    }
}

/// Per-entry delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LogStatus {
    Failure,
    Success,
}

impl LogStatus {
    /// Code stored in `fcm_notification_log.status`.
    pub fn code(self) -> i16 {
        match self {
            Self::Failure => 0,
            Self::Success => 1,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Failure),
            1 => Some(Self::Success),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failure => write!(f, "Failure"),
            Self::Success => write!(f, "Success"),
        }
    }
}

/// Log entry awaiting persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub result: DeliveryResult,
    pub sent_at: chrono::DateTime<chrono::Utc>,
}

impl NewLogEntry {
    /// Record a result stamped with the current time.
    pub fn now(result: DeliveryResult) -> Self {
        Self {
            result,
            sent_at: chrono::Utc::now(),
        }
    }

    pub fn status(&self) -> LogStatus {
        self.result.status()
    }
}

/// Persisted record of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeliveryLogEntry {
    pub id: i64,
    pub notification_id: i64,
    /// Serialized [`DeliveryResult`].
    pub result: String,
    pub status: LogStatus,
    pub sent_at: chrono::DateTime<chrono::Utc>,
}

impl DeliveryLogEntry {
    /// Decode the stored result, if it is well-formed.
    pub fn delivery_result(&self) -> Option<DeliveryResult> {
        serde_json::from_str(&self.result).ok()
    }
}
