//! Notification request types.

use std::collections::BTreeMap;

use crate::{DeliveryResult, Message, TargetError, TargetSpec};

/// Longest dispatch delay a request may carry.
pub const MAX_DELAY_SECONDS: u32 = i32::MAX as u32;

/// Opaque key-value data stored alongside a request.
pub type ExtraData = BTreeMap<String, serde_json::Value>;

/// Lifecycle status of a notification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NotificationStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Every delivery succeeded.
    Sent,
    /// Some token deliveries failed.
    PartiallyFailed,
    /// Every delivery failed, or the request was invalid.
    Failed,
    /// Claimed by a dispatcher; provider calls in flight.
    Sending,
}

impl NotificationStatus {
    /// Code stored in `fcm_notification.status`.
    pub fn code(self) -> i16 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::PartiallyFailed => 2,
            Self::Failed => 3,
            Self::Sending => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::Sent),
            2 => Some(Self::PartiallyFailed),
            3 => Some(Self::Failed),
            4 => Some(Self::Sending),
            _ => None,
        }
    }

    /// Whether this status ends the dispatch lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::PartiallyFailed | Self::Failed)
    }

    /// Aggregate per-recipient results into a terminal status.
    ///
    /// An empty set counts as failed.
    pub fn aggregate<'a>(results: impl IntoIterator<Item = &'a DeliveryResult>) -> Self {
        let (mut ok, mut failed) = (0usize, 0usize);
        for result in results {
            if result.is_success() {
                ok += 1;
            } else {
                failed += 1;
            }
        }

        match (ok, failed) {
            (0, _) => Self::Failed,
            (_, 0) => Self::Sent,
            _ => Self::PartiallyFailed,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Sent => write!(f, "Sent"),
            Self::PartiallyFailed => write!(f, "PartiallyFailed"),
            Self::Failed => write!(f, "Failed"),
            Self::Sending => write!(f, "Sending"),
        }
    }
}

/// Request rejected before any provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("delay cannot exceed {max} seconds (got {actual})")]
    DelayOutOfRange { max: u32, actual: u32 },
    #[error(transparent)]
    Target(#[from] TargetError),
}

/// A notification request as submitted by a caller.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NewNotification {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub image: Option<String>,
    pub target: TargetSpec,
    /// Seconds to wait before dispatch (0 = immediate).
    #[serde(default)]
    pub delay_seconds: u32,
    #[serde(default)]
    pub extra_data: Option<ExtraData>,
}

impl NewNotification {
    /// Create a new immediate notification.
    pub fn new(title: impl Into<String>, body: impl Into<String>, target: TargetSpec) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            image: None,
            target,
            delay_seconds: 0,
            extra_data: None,
        }
    }

    /// Set the image URL.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the dispatch delay.
    pub fn with_delay(mut self, seconds: u32) -> Self {
        self.delay_seconds = seconds;
        self
    }

    /// Check the parts of the request that must hold before it is stored.
    pub fn validate_delay(&self) -> Result<(), ValidationError> {
        if self.delay_seconds > MAX_DELAY_SECONDS {
            return Err(ValidationError::DelayOutOfRange {
                max: MAX_DELAY_SECONDS,
                actual: self.delay_seconds,
            });
        }
        Ok(())
    }

    /// Add an extra data field.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra_data
            .get_or_insert_with(ExtraData::new)
            .insert(key.into(), value.into());
        self
    }
}

/// A persisted notification request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NotificationRequest {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub image: Option<String>,
    pub target: TargetSpec,
    pub delay_seconds: u32,
    pub extra_data: Option<ExtraData>,
    pub status: NotificationStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl NotificationRequest {
    /// Check required fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyField("title"));
        }
        if self.body.trim().is_empty() {
            return Err(ValidationError::EmptyField("body"));
        }
        Ok(())
    }

    /// Build the provider message descriptor.
    pub fn message(&self) -> Message {
        Message {
            title: self.title.clone(),
            body: self.body.clone(),
            image: self.image.clone(),
        }
    }

    /// Earliest time the request should be dispatched.
    pub fn due_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at + chrono::Duration::seconds(i64::from(self.delay_seconds))
    }

    /// Whether a scheduler should dispatch this request at `now`.
    pub fn is_due(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.status == NotificationStatus::Pending && self.due_at() <= now
    }
}

/// Query filter for listing requests.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub status: Option<NotificationStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl NotificationFilter {
    pub fn with_status(mut self, status: NotificationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str, body: &str) -> NotificationRequest {
        let now = chrono::Utc::now();
        NotificationRequest {
            id: 1,
            title: title.into(),
            body: body.into(),
            image: None,
            target: TargetSpec::Topic("news".into()),
            delay_seconds: 30,
            extra_data: None,
            status: NotificationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_aggregate_status() {
        let ok = DeliveryResult::success("t1", "m1");
        let bad = DeliveryResult::failure("t2", "UNREGISTERED");

        assert_eq!(
            NotificationStatus::aggregate([&ok, &ok]),
            NotificationStatus::Sent
        );
        assert_eq!(
            NotificationStatus::aggregate([&ok, &bad, &ok]),
            NotificationStatus::PartiallyFailed
        );
        assert_eq!(
            NotificationStatus::aggregate([&bad]),
            NotificationStatus::Failed
        );
        assert_eq!(
            NotificationStatus::aggregate(std::iter::empty()),
            NotificationStatus::Failed
        );
    }

    #[test]
    fn test_status_codes() {
        for status in [
            NotificationStatus::Pending,
            NotificationStatus::Sent,
            NotificationStatus::PartiallyFailed,
            NotificationStatus::Failed,
            NotificationStatus::Sending,
        ] {
            assert_eq!(NotificationStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(NotificationStatus::from_code(9), None);
        assert_eq!(NotificationStatus::Pending.code(), 0);
    }

    #[test]
    fn test_validate_required_fields() {
        assert!(request("A", "B").validate().is_ok());
        assert_eq!(
            request(" ", "B").validate(),
            Err(ValidationError::EmptyField("title"))
        );
        assert_eq!(
            request("A", "").validate(),
            Err(ValidationError::EmptyField("body"))
        );
    }

    #[test]
    fn test_due_at() {
        let req = request("A", "B");
        assert_eq!(req.due_at() - req.created_at, chrono::Duration::seconds(30));
        assert!(!req.is_due(req.created_at));
        assert!(req.is_due(req.created_at + chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_builder() {
        let new = NewNotification::new("A", "B", TargetSpec::AllDevices)
            .with_image("https://example.com/a.png")
            .with_delay(30)
            .with_extra("campaign", "spring");

        assert_eq!(new.delay_seconds, 30);
        assert!(new.validate_delay().is_ok());
        assert_eq!(new.image.as_deref(), Some("https://example.com/a.png"));
        assert_eq!(
            new.extra_data.unwrap().get("campaign"),
            Some(&serde_json::Value::from("spring"))
        );
    }

    #[test]
    fn test_delay_range() {
        let at_max = NewNotification::new("A", "B", TargetSpec::AllDevices).with_delay(MAX_DELAY_SECONDS);
        assert!(at_max.validate_delay().is_ok());

        let over = at_max.with_delay(u32::MAX);
        assert_eq!(
            over.validate_delay(),
            Err(ValidationError::DelayOutOfRange {
                max: MAX_DELAY_SECONDS,
                actual: u32::MAX
            })
        );
    }
}
