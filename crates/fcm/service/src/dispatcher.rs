//! Notification dispatch.

use std::time::Duration;

use fcm_core::{
    DeliveryLogEntry, DeliveryResult, NewLogEntry, NewNotification, NotificationRequest,
    NotificationStatus, ResolvedTarget, SendTarget, ValidationError, resolve_target,
};
use fcm_push::{DeliveryClient, TransportError};
use fcm_storage::{Claim, NotificationStore};

/// Dispatch failure the caller must handle.
///
/// Delivery problems never show up here; they end up in the request's
/// status and log entries.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid notification: {0}")]
    Invalid(#[from] ValidationError),
    #[error("notification {0} not found")]
    NotFound(i64),
    #[error("notification {id} is not pending (status {status})")]
    NotPending {
        id: i64,
        status: NotificationStatus,
    },
    #[error("failed to persist notification state: {0}")]
    Persistence(color_eyre::eyre::Report),
}

/// Final state of one dispatch attempt.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub notification_id: i64,
    pub status: NotificationStatus,
    /// Stored log entries, in delivery order. Empty while `Pending`.
    pub entries: Vec<DeliveryLogEntry>,
}

/// Executes notification requests against a delivery client and records
/// the outcome.
pub struct Dispatcher<S, C> {
    store: S,
    client: C,
    send_timeout: Duration,
}

impl<S, C> Dispatcher<S, C> {
    pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a new dispatcher.
    pub fn new(store: S, client: C) -> Self {
        Self {
            store,
            client,
            send_timeout: Self::DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Bound every provider call; expiry is recorded as a failure.
    ///
    /// A multicast gets one `timeout` per token.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, C> Dispatcher<S, C>
where
    S: NotificationStore,
    C: DeliveryClient,
{
    /// Persist a request and dispatch it unless it is delayed.
    ///
    /// Delayed requests stay `Pending` until a scheduler calls
    /// [`Dispatcher::dispatch`].
    pub async fn submit(&self, request: &NewNotification) -> Result<DispatchOutcome, DispatchError> {
        request.validate_delay()?;

        let id = self
            .store
            .create(request)
            .map_err(DispatchError::Persistence)?;

        tracing::info!(
            notification_id = id,
            target_kind = request.target.kind(),
            delay_seconds = request.delay_seconds,
            "notification submitted"
        );

        if request.delay_seconds > 0 {
            return Ok(DispatchOutcome {
                notification_id: id,
                status: NotificationStatus::Pending,
                entries: Vec::new(),
            });
        }

        self.dispatch(id).await
    }

    /// Dispatch a stored pending request.
    pub async fn dispatch(&self, id: i64) -> Result<DispatchOutcome, DispatchError> {
        let request = match self.store.claim(id).map_err(DispatchError::Persistence)? {
            Claim::Claimed(request) => request,
            Claim::NotPending(status) => return Err(DispatchError::NotPending { id, status }),
            Claim::NotFound => return Err(DispatchError::NotFound(id)),
        };

        tracing::info!(
            notification_id = id,
            target_kind = request.target.kind(),
            "dispatching notification"
        );

        let results = self.deliver(&request).await;
        let status = NotificationStatus::aggregate(&results);
        let entries: Vec<NewLogEntry> = results.into_iter().map(NewLogEntry::now).collect();

        let stored = self
            .store
            .finalize(id, status, &entries)
            .map_err(DispatchError::Persistence)?;

        tracing::info!(
            notification_id = id,
            status = %status,
            entries = stored.len(),
            "dispatch complete"
        );

        Ok(DispatchOutcome {
            notification_id: id,
            status,
            entries: stored,
        })
    }

    /// Run the provider calls for a request. Never fails; every problem is
    /// a failed result.
    async fn deliver(&self, request: &NotificationRequest) -> Vec<DeliveryResult> {
        let resolved = request
            .validate()
            .and_then(|()| resolve_target(&request.target).map_err(ValidationError::from));

        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(notification_id = request.id, error = %e, "notification rejected");
                return vec![DeliveryResult::failure(request.target.kind(), e)];
            }
        };

        let message = request.message();

        match resolved {
            ResolvedTarget::Topic(topic) => {
                let target = SendTarget::Topic(topic);
                let call = self.client.send_single(&target, &message);

                let result = match self.bounded(self.send_timeout, call).await {
                    Ok(message_id) => DeliveryResult::success(target.name(), message_id),
                    Err(e) => {
                        tracing::warn!(
                            notification_id = request.id,
                            topic = target.name(),
                            error = %e,
                            "topic send failed"
                        );
                        DeliveryResult::failure(target.name(), e)
                    }
                };

                vec![result]
            }
            ResolvedTarget::Tokens(tokens) => {
                // Tokens go out one by one, each within its own window
                let windows = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
                let budget = self.send_timeout.saturating_mul(windows);
                let call = self.client.send_multicast(&message, &tokens);

                match self.bounded(budget, call).await {
                    Ok(results) => correlate(request.id, &tokens, results),
                    Err(e) => {
                        tracing::warn!(
                            notification_id = request.id,
                            tokens = tokens.len(),
                            error = %e,
                            "multicast send failed"
                        );
                        tokens
                            .iter()
                            .map(|token| DeliveryResult::failure(token.as_str(), &e))
                            .collect()
                    }
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        limit: Duration,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(TransportError::Timeout(limit)))
    }
}

/// Pair multicast results with the tokens they were sent for, by position.
///
/// Always yields one result per token.
fn correlate(id: i64, tokens: &[String], results: Vec<DeliveryResult>) -> Vec<DeliveryResult> {
    if results.len() != tokens.len() {
        tracing::warn!(
            notification_id = id,
            expected = tokens.len(),
            received = results.len(),
            "multicast result count mismatch"
        );
    }

    let mut results = results.into_iter();

    tokens
        .iter()
        .map(|token| match results.next() {
            Some(result) => DeliveryResult {
                target: token.clone(),
                ..result
            },
            None => DeliveryResult::failure(token.as_str(), "no result from provider"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use fcm_core::{LogStatus, TargetSpec};
    use fcm_storage::SqliteStorage;

    use super::*;
    use crate::testing::{MockClient, init_tracing};

    fn dispatcher(client: MockClient) -> Dispatcher<SqliteStorage, MockClient> {
        init_tracing();
        Dispatcher::new(SqliteStorage::in_memory().unwrap(), client)
    }

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("token-{i}")).collect()
    }

    #[tokio::test]
    async fn test_partial_multicast_failure() {
        let client = MockClient::new().failing(&["t2"]);
        let dispatcher = dispatcher(client.clone());

        let request = NewNotification::new(
            "A",
            "B",
            TargetSpec::Tokens(vec!["t1".into(), "t2".into(), "t3".into()]),
        );
        let outcome = dispatcher.submit(&request).await.unwrap();

        assert_eq!(outcome.status, NotificationStatus::PartiallyFailed);
        assert_eq!(outcome.entries.len(), 3);

        let logs = dispatcher.store().log_entries(outcome.notification_id).unwrap();
        let statuses: Vec<_> = logs.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![LogStatus::Success, LogStatus::Failure, LogStatus::Success]
        );
        assert_eq!(logs[1].delivery_result().unwrap().target, "t2");

        let stored = dispatcher.store().get(outcome.notification_id).unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::PartiallyFailed);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_multicast_status_by_success_count() {
        let all: Vec<String> = tokens(5);

        for k in 0..=5 {
            let failing: Vec<&str> = all[k..].iter().map(String::as_str).collect();
            let dispatcher = dispatcher(MockClient::new().failing(&failing));

            let outcome = dispatcher
                .submit(&NewNotification::new("A", "B", TargetSpec::Tokens(all.clone())))
                .await
                .unwrap();

            let successes = outcome
                .entries
                .iter()
                .filter(|e| e.status == LogStatus::Success)
                .count();
            assert_eq!(outcome.entries.len(), 5);
            assert_eq!(successes, k);

            let expected = match k {
                0 => NotificationStatus::Failed,
                5 => NotificationStatus::Sent,
                _ => NotificationStatus::PartiallyFailed,
            };
            assert_eq!(outcome.status, expected);
        }
    }

    #[tokio::test]
    async fn test_topic_transport_error_is_recorded() {
        let client = MockClient::new().failing(&["news"]);
        let dispatcher = dispatcher(client.clone());

        let outcome = dispatcher
            .submit(&NewNotification::new("A", "B", TargetSpec::Topic("news".into())))
            .await
            .unwrap();

        assert_eq!(outcome.status, NotificationStatus::Failed);
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].status, LogStatus::Failure);
        assert!(
            outcome.entries[0]
                .delivery_result()
                .unwrap()
                .error
                .unwrap()
                .contains("UNREGISTERED")
        );
    }

    #[tokio::test]
    async fn test_topic_send_single_entry() {
        let client = MockClient::new();
        let dispatcher = dispatcher(client.clone());

        let outcome = dispatcher
            .submit(
                &NewNotification::new("A", "B", TargetSpec::Topic("news".into()))
                    .with_image("https://example.com/a.png"),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, NotificationStatus::Sent);
        assert_eq!(outcome.entries.len(), 1);

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "news");
        assert_eq!(sent[0].1.image.as_deref(), Some("https://example.com/a.png"));
    }

    #[tokio::test]
    async fn test_all_devices_sends_to_reserved_topic() {
        let client = MockClient::new();
        let dispatcher = dispatcher(client.clone());

        let outcome = dispatcher
            .submit(&NewNotification::new("A", "B", TargetSpec::AllDevices))
            .await
            .unwrap();

        assert_eq!(outcome.status, NotificationStatus::Sent);
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(client.sent()[0].0, "all");
    }

    #[tokio::test]
    async fn test_oversized_multicast_rejected_without_transport_call() {
        for n in [101, 250, 1000] {
            let client = MockClient::new();
            let dispatcher = dispatcher(client.clone());

            let outcome = dispatcher
                .submit(&NewNotification::new("A", "B", TargetSpec::Tokens(tokens(n))))
                .await
                .unwrap();

            assert_eq!(outcome.status, NotificationStatus::Failed);
            assert_eq!(outcome.entries.len(), 1);
            assert!(
                outcome.entries[0]
                    .delivery_result()
                    .unwrap()
                    .error
                    .unwrap()
                    .contains("cannot exceed 100")
            );
            assert_eq!(client.calls(), 0);
        }
    }

    #[tokio::test]
    async fn test_empty_title_rejected_without_transport_call() {
        let client = MockClient::new();
        let dispatcher = dispatcher(client.clone());

        let outcome = dispatcher
            .submit(&NewNotification::new("", "B", TargetSpec::AllDevices))
            .await
            .unwrap();

        assert_eq!(outcome.status, NotificationStatus::Failed);
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_delay_rejected_before_storage() {
        let client = MockClient::new();
        let dispatcher = dispatcher(client.clone());

        let result = dispatcher
            .submit(&NewNotification::new("A", "B", TargetSpec::AllDevices).with_delay(u32::MAX))
            .await;

        assert!(matches!(
            result,
            Err(DispatchError::Invalid(ValidationError::DelayOutOfRange { .. }))
        ));
        assert!(
            dispatcher
                .store()
                .list(&fcm_core::NotificationFilter::default())
                .unwrap()
                .is_empty()
        );
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_whole_multicast_failure_logs_every_token() {
        let dispatcher = dispatcher(MockClient::new().rejecting());

        let outcome = dispatcher
            .submit(&NewNotification::new("A", "B", TargetSpec::Tokens(tokens(3))))
            .await
            .unwrap();

        assert_eq!(outcome.status, NotificationStatus::Failed);
        assert_eq!(outcome.entries.len(), 3);
        assert!(outcome.entries.iter().all(|e| e.status == LogStatus::Failure));
    }

    #[tokio::test]
    async fn test_timeout_becomes_failure() {
        let client = MockClient::new().slow(Duration::from_secs(5));
        let dispatcher = dispatcher(client).with_send_timeout(Duration::from_millis(50));

        let outcome = dispatcher
            .submit(&NewNotification::new("A", "B", TargetSpec::Topic("news".into())))
            .await
            .unwrap();

        assert_eq!(outcome.status, NotificationStatus::Failed);
        assert!(
            outcome.entries[0]
                .delivery_result()
                .unwrap()
                .error
                .unwrap()
                .contains("timed out")
        );
    }

    #[tokio::test]
    async fn test_sequential_multicast_keeps_delivered_tokens() {
        let client = MockClient::new().slow_per_token(Duration::from_millis(30));
        let dispatcher = dispatcher(client.clone()).with_send_timeout(Duration::from_millis(100));

        let outcome = dispatcher
            .submit(&NewNotification::new("A", "B", TargetSpec::Tokens(tokens(10))))
            .await
            .unwrap();

        assert_eq!(client.sent().len(), 10);
        assert_eq!(outcome.entries.len(), 10);
        assert!(outcome.entries.iter().all(|e| e.status == LogStatus::Success));
        assert_eq!(outcome.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn test_delayed_request_stays_pending() {
        let client = MockClient::new();
        let dispatcher = dispatcher(client.clone());

        let outcome = dispatcher
            .submit(&NewNotification::new("A", "B", TargetSpec::AllDevices).with_delay(30))
            .await
            .unwrap();

        assert_eq!(outcome.status, NotificationStatus::Pending);
        assert!(outcome.entries.is_empty());
        assert_eq!(client.calls(), 0);

        let stored = dispatcher.store().get(outcome.notification_id).unwrap().unwrap();
        assert_eq!(stored.delay_seconds, 30);
        assert_eq!(stored.status, NotificationStatus::Pending);

        // Scheduler fires later
        let fired = dispatcher.dispatch(outcome.notification_id).await.unwrap();
        assert_eq!(fired.status, NotificationStatus::Sent);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_second_dispatch_is_refused() {
        let client = MockClient::new();
        let dispatcher = dispatcher(client.clone());

        let outcome = dispatcher
            .submit(&NewNotification::new("A", "B", TargetSpec::AllDevices))
            .await
            .unwrap();

        let again = dispatcher.dispatch(outcome.notification_id).await;
        assert!(matches!(
            again,
            Err(DispatchError::NotPending {
                status: NotificationStatus::Sent,
                ..
            })
        ));
        assert!(matches!(
            dispatcher.dispatch(9999).await,
            Err(DispatchError::NotFound(9999))
        ));
        assert_eq!(client.calls(), 1);
        assert_eq!(
            dispatcher
                .store()
                .log_entries(outcome.notification_id)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_dispatch_sends_once() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let url = dir.path().join("fcm.db").to_string_lossy().into_owned();
        let store = SqliteStorage::new(&url).unwrap();
        store.run_migrations().unwrap();

        let client = MockClient::new().slow(Duration::from_millis(50));
        let dispatcher = std::sync::Arc::new(Dispatcher::new(store, client.clone()));
        let id = dispatcher
            .store()
            .create(&NewNotification::new("A", "B", TargetSpec::Topic("news".into())))
            .unwrap();

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.dispatch(id).await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap());
        }

        let (sent, refused): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(Result::is_ok);
        assert_eq!(sent.len(), 1);
        assert!(matches!(refused[0], Err(DispatchError::NotPending { .. })));
        assert_eq!(client.calls(), 1);
        assert_eq!(dispatcher.store().log_entries(id).unwrap().len(), 1);
        assert_eq!(
            dispatcher.store().get(id).unwrap().unwrap().status,
            NotificationStatus::Sent
        );
    }

    #[test]
    fn test_correlate_fills_missing_results() {
        let tokens = vec!["t1".to_string(), "t2".to_string()];
        let results = vec![DeliveryResult::success("other", "m1")];

        let correlated = correlate(1, &tokens, results);
        assert_eq!(correlated.len(), 2);
        assert_eq!(correlated[0].target, "t1");
        assert!(correlated[0].is_success());
        assert!(!correlated[1].is_success());
    }
}
