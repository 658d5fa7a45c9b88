//! Storage traits.

use fcm_core::{
    DeliveryLogEntry, NewLogEntry, NewNotification, NotificationFilter, NotificationRequest,
    NotificationStatus,
};

/// Result of trying to claim a request for dispatch.
#[derive(Debug, Clone)]
pub enum Claim {
    /// Status moved from `Pending` to `Sending`; the caller owns the dispatch.
    Claimed(NotificationRequest),
    /// Request is not pending (already claimed or finished).
    NotPending(NotificationStatus),
    /// No request with that ID.
    NotFound,
}

/// Notification request and delivery log storage.
pub trait NotificationStore: Send + Sync {
    /// Persist a new request with `Pending` status and return its ID.
    fn create(&self, request: &NewNotification) -> color_eyre::eyre::Result<i64>;

    /// Get a request by ID.
    fn get(&self, id: i64) -> color_eyre::eyre::Result<Option<NotificationRequest>>;

    /// List requests matching a filter, oldest first.
    fn list(&self, filter: &NotificationFilter)
    -> color_eyre::eyre::Result<Vec<NotificationRequest>>;

    /// Set a request's status unconditionally (administrative correction).
    fn update_status(&self, id: i64, status: NotificationStatus) -> color_eyre::eyre::Result<()>;

    /// Append log entries to an existing request.
    fn append_log_entries(
        &self,
        id: i64,
        entries: &[NewLogEntry],
    ) -> color_eyre::eyre::Result<Vec<DeliveryLogEntry>>;

    /// Get all log entries for a request, in insertion order.
    fn log_entries(&self, id: i64) -> color_eyre::eyre::Result<Vec<DeliveryLogEntry>>;

    /// Atomically move a request from `Pending` to `Sending`.
    fn claim(&self, id: i64) -> color_eyre::eyre::Result<Claim>;

    /// Write the terminal status and the full set of log entries in one
    /// transaction. Fails unless the request is `Sending`.
    fn finalize(
        &self,
        id: i64,
        status: NotificationStatus,
        entries: &[NewLogEntry],
    ) -> color_eyre::eyre::Result<Vec<DeliveryLogEntry>>;

    /// Delete a request together with its log entries.
    fn delete(&self, id: i64) -> color_eyre::eyre::Result<bool>;
}

/// Maps application device keys to delivery tokens.
pub trait DeviceRegistry: Send + Sync {
    /// Register (or replace) the token for a device.
    fn register(&self, device_key: &str, token: &str) -> color_eyre::eyre::Result<()>;

    /// Look up the token for a device.
    fn lookup(&self, device_key: &str) -> color_eyre::eyre::Result<Option<String>>;

    /// Look up tokens for several devices, skipping unknown keys.
    fn lookup_many(&self, device_keys: &[&str]) -> color_eyre::eyre::Result<Vec<String>> {
        let mut tokens = Vec::with_capacity(device_keys.len());
        for key in device_keys {
            if let Some(token) = self.lookup(key)? {
                tokens.push(token);
            }
        }
        Ok(tokens)
    }

    /// Remove a device. Returns whether it was registered.
    fn unregister(&self, device_key: &str) -> color_eyre::eyre::Result<bool>;
}
