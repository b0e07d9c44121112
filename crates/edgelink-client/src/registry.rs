//! # Pending-Request Registry
//!
//! Every published command opens a pending request watching one
//! notification path per affected object. Requests settle from typed
//! notifications according to a per-command strategy, or from timers.
//!
//! ## Timeouts
//!
//! The literal protocol constants are kept even though their ordering is
//! unusual: the first-response timer (1500 s) is far longer than the
//! completion timer (90 s), so in practice the completion timer fires
//! first for silent nodes. Both are injectable for tests.
//!
//! ## Settlement
//!
//! - resolve: every target answered and every status is ok
//! - reject: every target answered and at least one failed
//! - an `EXCEPTION`-typed notification rejects immediately
//! - a timer rejects with a synthetic timeout record

use crate::errors::{FailureReason, RequestFailure};
use edgelink_types::notification_codes as codes;
use edgelink_types::{CommandAction, NotificationRecord, PayloadPath};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Time allowed until the first correlated notification.
pub const TIMEOUT_TO_FIRST_RESPONSE: Duration = Duration::from_secs(1500);
/// Time allowed until full completion.
pub const TIMEOUT_MAX_REQUEST_TIME: Duration = Duration::from_secs(90);

/// The pair of request timers.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeouts {
    /// Fires when no watched notification arrived at all.
    pub first_response: Duration,
    /// Fires when the request did not settle in time.
    pub completion: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            first_response: TIMEOUT_TO_FIRST_RESPONSE,
            completion: TIMEOUT_MAX_REQUEST_TIME,
        }
    }
}

/// Result delivered to a request's caller.
pub type RequestResult = Result<Vec<NotificationRecord>, RequestFailure>;

/// Caller-side handle of a pending request.
pub struct RequestHandle {
    id: String,
    receiver: oneshot::Receiver<RequestResult>,
}

impl RequestHandle {
    /// The request id (stamped as `SESSION_ID` on the wire).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Await settlement.
    pub async fn await_result(self) -> RequestResult {
        match self.receiver.await {
            Ok(result) => result,
            // Registry dropped with the request open.
            Err(_) => Err(RequestFailure {
                reason: FailureReason::Shutdown,
                notifications: Vec::new(),
            }),
        }
    }
}

/// Notice that a request closed and its watches should be withdrawn.
#[derive(Debug, Clone)]
pub struct ClosedRequest {
    /// The request id.
    pub id: String,
    /// The paths it watched.
    pub paths: Vec<PayloadPath>,
}

/// How notification codes settle targets of one command kind.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionStrategy {
    ok: &'static [&'static str],
    fail: &'static [&'static str],
}

impl ResolutionStrategy {
    /// The strategy watching a command kind.
    #[must_use]
    pub fn for_action(action: CommandAction) -> Self {
        match action {
            CommandAction::ArchiveConfig => Self {
                ok: &[codes::PIPELINE_ARCHIVE_OK],
                fail: &[codes::PIPELINE_ARCHIVE_FAILED],
            },
            CommandAction::UpdateConfig | CommandAction::PipelineCommand => Self {
                ok: &[
                    codes::PIPELINE_OK,
                    codes::PIPELINE_DCT_CONFIG_OK,
                    codes::PLUGIN_OK,
                ],
                fail: &[
                    codes::PIPELINE_FAILED,
                    codes::PIPELINE_DCT_CONFIG_FAILED,
                    codes::PLUGIN_FAILED,
                ],
            },
            CommandAction::UpdatePipelineInstance
            | CommandAction::BatchUpdatePipelineInstance => Self {
                ok: &[
                    codes::PLUGIN_OK,
                    codes::PLUGIN_INSTANCE_COMMAND_OK,
                    codes::PLUGIN_PAUSE_OK,
                    codes::PLUGIN_RESUME_OK,
                    codes::PLUGIN_WORKING_HOURS_OK,
                    codes::PLUGIN_CONFIG_IN_PAUSE_OK,
                ],
                fail: &[
                    codes::PLUGIN_FAILED,
                    codes::PLUGIN_INSTANCE_COMMAND_FAILED,
                    codes::PLUGIN_PAUSE_FAILED,
                    codes::PLUGIN_RESUME_FAILED,
                    codes::PLUGIN_WORKING_HOURS_FAILED,
                    codes::PLUGIN_CONFIG_IN_PAUSE_FAILED,
                ],
            },
        }
    }

    /// `Some(true)` on a success code, `Some(false)` on a failure code,
    /// `None` for codes this strategy ignores.
    #[must_use]
    pub fn classify(&self, code: &str) -> Option<bool> {
        if self.ok.contains(&code) {
            Some(true)
        } else if self.fail.contains(&code) {
            Some(false)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetStatus {
    Pending,
    Ok,
    Failed,
}

struct PendingRequest {
    targets: HashMap<String, TargetStatus>,
    paths: Vec<PayloadPath>,
    notifications: Vec<NotificationRecord>,
    strategy: ResolutionStrategy,
    sender: Option<oneshot::Sender<RequestResult>>,
    first_timer: Option<JoinHandle<()>>,
    completion_timer: Option<JoinHandle<()>>,
    responded: bool,
}

#[derive(Default)]
struct Inner {
    requests: HashMap<String, PendingRequest>,
    path_index: HashMap<String, Vec<String>>,
}

/// The per-client registry of outstanding commands.
pub struct PendingRequestRegistry {
    inner: Mutex<Inner>,
    timeouts: RequestTimeouts,
    closed_tx: mpsc::UnboundedSender<ClosedRequest>,
    // Timer tasks re-enter the registry through this handle.
    me: std::sync::Weak<Self>,
}

impl PendingRequestRegistry {
    /// Create a registry and the stream of close notices the client uses
    /// to withdraw watches.
    #[must_use]
    pub fn new(timeouts: RequestTimeouts) -> (Arc<Self>, mpsc::UnboundedReceiver<ClosedRequest>) {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        (
            Arc::new_cyclic(|me| Self {
                inner: Mutex::new(Inner::default()),
                timeouts,
                closed_tx,
                me: me.clone(),
            }),
            closed_rx,
        )
    }

    /// Open a request watching `watches`.
    ///
    /// Fire-and-forget commands (no watches) resolve immediately with a
    /// synthetic notification.
    #[must_use]
    pub fn open(&self, action: CommandAction, watches: &[PayloadPath]) -> RequestHandle {
        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = oneshot::channel();

        if watches.is_empty() {
            let _ = sender.send(Ok(vec![synthetic_record(
                "COMMAND_SENT",
                "command published without trackable targets",
            )]));
            return RequestHandle { id, receiver };
        }

        let mut request = PendingRequest {
            targets: watches
                .iter()
                .map(|p| (p.path_key(), TargetStatus::Pending))
                .collect(),
            paths: watches.to_vec(),
            notifications: Vec::new(),
            strategy: ResolutionStrategy::for_action(action),
            sender: Some(sender),
            first_timer: None,
            completion_timer: None,
            responded: false,
        };

        let first = {
            let registry = self.me.clone();
            let request_id = id.clone();
            let delay = self.timeouts.first_response;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(registry) = registry.upgrade() {
                    registry.on_timeout(&request_id, true);
                }
            })
        };
        let completion = {
            let registry = self.me.clone();
            let request_id = id.clone();
            let delay = self.timeouts.completion;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(registry) = registry.upgrade() {
                    registry.on_timeout(&request_id, false);
                }
            })
        };
        request.first_timer = Some(first);
        request.completion_timer = Some(completion);

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for path in watches {
            inner
                .path_index
                .entry(path.path_key())
                .or_default()
                .push(id.clone());
        }
        inner.requests.insert(id.clone(), request);
        debug!(request_id = %id, targets = watches.len(), "request opened");

        RequestHandle { id, receiver }
    }

    /// Number of open requests.
    #[must_use]
    pub fn open_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.requests.len()
    }

    /// Route an inbound notification to the requests watching it.
    ///
    /// A `SESSION_ID` match wins over the path index; unmatched
    /// notifications are ignored here (they still reach the application
    /// event stream).
    pub fn handle_notification(&self, record: &NotificationRecord) {
        let ids: Vec<String> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(session) = record
                .session_id
                .as_ref()
                .filter(|s| inner.requests.contains_key(*s))
            {
                vec![session.clone()]
            } else {
                inner
                    .path_index
                    .get(&record.path.path_key())
                    .cloned()
                    .unwrap_or_default()
            }
        };

        for id in ids {
            self.apply(&id, record);
        }
    }

    fn apply(&self, request_id: &str, record: &NotificationRecord) {
        let settled = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let Some(request) = inner.requests.get_mut(request_id) else {
                return;
            };

            request.notifications.push(record.clone());
            if !request.responded {
                request.responded = true;
                if let Some(timer) = request.first_timer.take() {
                    timer.abort();
                }
            }

            if record.is_exception() {
                let key = record.path.path_key();
                if let Some(status) = request.targets.get_mut(&key) {
                    *status = TargetStatus::Failed;
                }
                Some(Err(FailureReason::Exception))
            } else {
                let key = record.path.path_key();
                if let (Some(status), Some(code)) =
                    (request.targets.get_mut(&key), record.code.as_deref())
                {
                    match request.strategy.classify(code) {
                        Some(true) => *status = TargetStatus::Ok,
                        Some(false) => *status = TargetStatus::Failed,
                        None => {}
                    }
                }

                let complete = request
                    .targets
                    .values()
                    .all(|s| *s != TargetStatus::Pending);
                if complete {
                    let all_ok = request.targets.values().all(|s| *s == TargetStatus::Ok);
                    if all_ok {
                        Some(Ok(()))
                    } else {
                        Some(Err(FailureReason::TargetsFailed))
                    }
                } else {
                    None
                }
            }
        };

        match settled {
            Some(Ok(())) => self.settle(request_id, None),
            Some(Err(reason)) => self.settle(request_id, Some(reason)),
            None => {}
        }
    }

    fn on_timeout(&self, request_id: &str, first_response: bool) {
        {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let Some(request) = inner.requests.get(request_id) else {
                return;
            };
            if first_response && request.responded {
                return;
            }
        }
        warn!(request_id = %request_id, first_response, "request timed out");
        self.settle_with_record(
            request_id,
            Some(FailureReason::Timeout),
            Some(synthetic_record("TIMEOUT", "request timed out")),
        );
    }

    /// Close one open request with the given reason.
    pub fn fail(&self, request_id: &str, reason: FailureReason) {
        self.settle(request_id, Some(reason));
    }

    /// Close every open request with the given reason (shutdown path).
    pub fn fail_all(&self, reason: FailureReason) {
        let ids: Vec<String> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.requests.keys().cloned().collect()
        };
        for id in ids {
            self.settle(&id, Some(reason));
        }
    }

    fn settle(&self, request_id: &str, failure: Option<FailureReason>) {
        self.settle_with_record(request_id, failure, None);
    }

    fn settle_with_record(
        &self,
        request_id: &str,
        failure: Option<FailureReason>,
        extra: Option<NotificationRecord>,
    ) {
        let closed = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let Some(mut request) = inner.requests.remove(request_id) else {
                return;
            };

            for path in &request.paths {
                let key = path.path_key();
                if let Some(ids) = inner.path_index.get_mut(&key) {
                    ids.retain(|id| id != request_id);
                    if ids.is_empty() {
                        inner.path_index.remove(&key);
                    }
                }
            }

            for timer in [request.first_timer.take(), request.completion_timer.take()]
                .into_iter()
                .flatten()
            {
                timer.abort();
            }

            if let Some(record) = extra {
                request.notifications.push(record);
            }

            if let Some(sender) = request.sender.take() {
                let result = match failure {
                    None => Ok(request.notifications.clone()),
                    Some(reason) => Err(RequestFailure {
                        reason,
                        notifications: request.notifications.clone(),
                    }),
                };
                let _ = sender.send(result);
            }

            ClosedRequest {
                id: request_id.to_string(),
                paths: request.paths,
            }
        };

        debug!(request_id = %closed.id, "request closed");
        let _ = self.closed_tx.send(closed);
    }
}

fn synthetic_record(code: &str, text: &str) -> NotificationRecord {
    NotificationRecord {
        code: Some(code.to_string()),
        kind: None,
        tag: None,
        session_id: None,
        path: PayloadPath::node("*"),
        payload: json!({ "NOTIFICATION": text, "SYNTHETIC": true }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgelink_types::notification_types;

    fn record(path: &PayloadPath, code: &str) -> NotificationRecord {
        NotificationRecord {
            code: Some(code.to_string()),
            kind: Some(notification_types::NORMAL.to_string()),
            tag: None,
            session_id: None,
            path: path.clone(),
            payload: json!({}),
        }
    }

    fn fast_timeouts() -> RequestTimeouts {
        RequestTimeouts {
            first_response: Duration::from_millis(500),
            completion: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_single_watch_resolves_on_ok() {
        let (registry, _closed) = PendingRequestRegistry::new(RequestTimeouts::default());
        let path = PayloadPath::instance("n", "p", "S", "i");
        let handle = registry.open(CommandAction::UpdatePipelineInstance, &[path.clone()]);

        registry.handle_notification(&record(&path, codes::PLUGIN_OK));

        let notifications = handle.await_result().await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(registry.open_count(), 0);
    }

    #[tokio::test]
    async fn test_two_watches_need_both() {
        let (registry, _closed) = PendingRequestRegistry::new(RequestTimeouts::default());
        let p1 = PayloadPath::instance("n", "p", "S", "i1");
        let p2 = PayloadPath::instance("n", "p", "S", "i2");
        let handle = registry.open(
            CommandAction::BatchUpdatePipelineInstance,
            &[p1.clone(), p2.clone()],
        );

        registry.handle_notification(&record(&p1, codes::PLUGIN_OK));
        assert_eq!(registry.open_count(), 1);

        registry.handle_notification(&record(&p2, codes::PLUGIN_OK));
        let notifications = handle.await_result().await.unwrap();
        assert_eq!(notifications.len(), 2);
    }

    #[tokio::test]
    async fn test_mixed_outcome_rejects_with_all_notifications() {
        let (registry, _closed) = PendingRequestRegistry::new(RequestTimeouts::default());
        let p1 = PayloadPath::instance("n", "p", "S", "i1");
        let p2 = PayloadPath::instance("n", "p", "S", "i2");
        let handle = registry.open(
            CommandAction::BatchUpdatePipelineInstance,
            &[p1.clone(), p2.clone()],
        );

        registry.handle_notification(&record(&p1, codes::PLUGIN_OK));
        registry.handle_notification(&record(&p2, codes::PLUGIN_FAILED));

        let failure = handle.await_result().await.unwrap_err();
        assert_eq!(failure.reason, FailureReason::TargetsFailed);
        assert_eq!(failure.notifications.len(), 2);
    }

    #[tokio::test]
    async fn test_exception_rejects_immediately() {
        let (registry, _closed) = PendingRequestRegistry::new(RequestTimeouts::default());
        let p1 = PayloadPath::instance("n", "p", "S", "i1");
        let p2 = PayloadPath::instance("n", "p", "S", "i2");
        let handle = registry.open(
            CommandAction::BatchUpdatePipelineInstance,
            &[p1.clone(), p2.clone()],
        );

        let mut exc = record(&p1, codes::PLUGIN_FAILED);
        exc.kind = Some(notification_types::EXCEPTION.to_string());
        registry.handle_notification(&exc);

        let failure = handle.await_result().await.unwrap_err();
        assert_eq!(failure.reason, FailureReason::Exception);
        assert_eq!(registry.open_count(), 0);
    }

    #[tokio::test]
    async fn test_session_id_match_wins_over_path() {
        let (registry, _closed) = PendingRequestRegistry::new(RequestTimeouts::default());
        let path = PayloadPath::pipeline("n", "p");
        let handle = registry.open(CommandAction::UpdateConfig, &[path.clone()]);

        let mut rec = record(&path, codes::PIPELINE_OK);
        rec.session_id = Some(handle.id().to_string());
        registry.handle_notification(&rec);

        assert!(handle.await_result().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_timeout_rejects() {
        let (registry, _closed) = PendingRequestRegistry::new(fast_timeouts());
        let path = PayloadPath::pipeline("n", "p");
        let handle = registry.open(CommandAction::UpdateConfig, &[path]);

        let failure = handle.await_result().await.unwrap_err();
        assert_eq!(failure.reason, FailureReason::Timeout);
        assert_eq!(failure.notifications.len(), 1);
        assert_eq!(failure.notifications[0].code.as_deref(), Some("TIMEOUT"));
        assert_eq!(registry.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_cleared_on_resolve() {
        let (registry, mut closed) = PendingRequestRegistry::new(fast_timeouts());
        let path = PayloadPath::pipeline("n", "p");
        let handle = registry.open(CommandAction::UpdateConfig, &[path.clone()]);

        registry.handle_notification(&record(&path, codes::PIPELINE_OK));
        assert!(handle.await_result().await.is_ok());

        let notice = closed.recv().await.unwrap();
        assert_eq!(notice.paths.len(), 1);

        // Let both timer deadlines pass; no second close notice may appear.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(closed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_watches_resolve_immediately() {
        let (registry, _closed) = PendingRequestRegistry::new(RequestTimeouts::default());
        let handle = registry.open(CommandAction::PipelineCommand, &[]);

        let notifications = handle.await_result().await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(registry.open_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_on_shutdown() {
        let (registry, _closed) = PendingRequestRegistry::new(RequestTimeouts::default());
        let h1 = registry.open(CommandAction::UpdateConfig, &[PayloadPath::pipeline("n", "a")]);
        let h2 = registry.open(CommandAction::UpdateConfig, &[PayloadPath::pipeline("n", "b")]);

        registry.fail_all(FailureReason::Shutdown);

        assert_eq!(
            h1.await_result().await.unwrap_err().reason,
            FailureReason::Shutdown
        );
        assert_eq!(
            h2.await_result().await.unwrap_err().reason,
            FailureReason::Shutdown
        );
    }

    #[tokio::test]
    async fn test_unwatched_code_leaves_target_pending() {
        let (registry, _closed) = PendingRequestRegistry::new(RequestTimeouts::default());
        let path = PayloadPath::pipeline("n", "p");
        let _handle = registry.open(CommandAction::ArchiveConfig, &[path.clone()]);

        // A code outside the archive strategy must not settle the target.
        registry.handle_notification(&record(&path, codes::PLUGIN_OK));
        assert_eq!(registry.open_count(), 1);
    }
}
