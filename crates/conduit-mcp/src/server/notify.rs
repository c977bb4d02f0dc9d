//! Notification routing: the capability handlers use to push frames to
//! the client without knowing about transports.
//!
//! Three sinks exist per server: the in-request sink (frames join the SSE
//! reply stream of the originating POST), the session sink (frames drain
//! through whatever long-lived stream is attached), and broadcast across
//! all sessions.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use crate::protocol::{
    LogLevel, LogMessageParams, Message, Notification, ProgressParams, methods,
};
use crate::server::session::{Session, SessionStore};

#[derive(Clone)]
enum Sink {
    /// Bound to the reply stream of the request being handled.
    Request(mpsc::Sender<Notification>),
    /// Bound to the session's outbound channel.
    Session(Arc<Session>),
    /// Notifications are dropped (client did not accept a stream).
    Disabled,
}

/// Capability for emitting server-initiated notifications. Carried by
/// [`RequestContext`]; cheap to clone.
#[derive(Clone)]
pub struct NotificationSender {
    sink: Sink,
}

impl NotificationSender {
    #[must_use]
    pub fn for_request(tx: mpsc::Sender<Notification>) -> Self {
        Self { sink: Sink::Request(tx) }
    }

    #[must_use]
    pub fn for_session(session: Arc<Session>) -> Self {
        Self { sink: Sink::Session(session) }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self { sink: Sink::Disabled }
    }

    /// Deliver one notification. Returns false when the frame was dropped.
    pub async fn send(&self, notification: Notification) -> bool {
        match &self.sink {
            Sink::Request(tx) => {
                if tx.send(notification).await.is_err() {
                    tracing::debug!("Reply stream gone, notification dropped");
                    return false;
                }
                true
            }
            Sink::Session(session) => {
                session.push_outbound(Message::Notification(notification)).await
            }
            Sink::Disabled => {
                tracing::debug!("No notification sink attached, frame dropped");
                false
            }
        }
    }

    /// Emit `notifications/progress`.
    pub async fn send_progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<&str>,
    ) -> bool {
        let params = ProgressParams {
            progress_token: None,
            progress,
            total,
            message: message.map(str::to_string),
        };
        let params = serde_json::to_value(params).unwrap_or_default();
        self.send(Notification::new(methods::PROGRESS, Some(params))).await
    }

    /// Emit `notifications/message`.
    pub async fn send_log_message(&self, level: LogLevel, message: impl Into<String>) -> bool {
        let params = LogMessageParams { level, logger: None, data: json!(message.into()) };
        let params = serde_json::to_value(params).unwrap_or_default();
        self.send(Notification::new(methods::LOG_MESSAGE, Some(params))).await
    }
}

/// Execution context handed to tool, resource, and prompt handlers.
/// Carries the owning session and the notification capability; handlers
/// never hold a reference back to the server.
pub struct RequestContext {
    session: Arc<Session>,
    notifier: NotificationSender,
}

impl RequestContext {
    #[must_use]
    pub fn new(session: Arc<Session>, notifier: NotificationSender) -> Self {
        Self { session, notifier }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub const fn notifier(&self) -> &NotificationSender {
        &self.notifier
    }

    pub async fn send_progress(&self, progress: f64, total: Option<f64>, message: Option<&str>) {
        self.notifier.send_progress(progress, total, message).await;
    }

    pub async fn send_log_message(&self, level: LogLevel, message: impl Into<String>) {
        self.notifier.send_log_message(level, message).await;
    }
}

/// Push a notification to every active session. The session list is
/// snapshotted under the read lock, pushes happen without it; sessions
/// terminated mid-broadcast count as failures. Returns the failure count.
pub async fn broadcast(store: &SessionStore, notification: &Notification) -> usize {
    let sessions = store.snapshot().await;
    let mut failures = 0;
    for session in sessions {
        if !session.push_outbound(Message::Notification(notification.clone())).await {
            failures += 1;
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_request_sink_preserves_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = NotificationSender::for_request(tx);

        sender.send_log_message(LogLevel::Info, "one").await;
        sender.send_log_message(LogLevel::Info, "two").await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.method, "notifications/message");
        assert!(serde_json::to_string(&first.params).unwrap().contains("one"));
        assert!(serde_json::to_string(&second.params).unwrap().contains("two"));
    }

    #[tokio::test]
    async fn test_disabled_sink_drops() {
        let sender = NotificationSender::disabled();
        assert!(!sender.send(Notification::new("notifications/message", None)).await);
    }

    #[tokio::test]
    async fn test_progress_params_shape() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = NotificationSender::for_request(tx);
        sender.send_progress(0.5, Some(1.0), Some("halfway")).await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.method, "notifications/progress");
        let params = frame.params.unwrap();
        assert_eq!(params["progress"], 0.5);
        assert_eq!(params["total"], 1.0);
        assert_eq!(params["message"], "halfway");
    }

    #[tokio::test]
    async fn test_broadcast_counts_failures() {
        let store = SessionStore::new(Duration::from_secs(60));
        let healthy = store.create().await;
        let saturated = store.create().await;

        // Saturate one session's channel so the broadcast push fails.
        for _ in 0..crate::config::defaults::NOTIFY_CHANNEL_CAPACITY {
            saturated
                .push_outbound(Message::Notification(Notification::new(
                    "notifications/message",
                    None,
                )))
                .await;
        }

        let failures =
            broadcast(&store, &Notification::new("notifications/message", None)).await;
        assert_eq!(failures, 1);

        // The healthy session received the frame.
        let mut rx = healthy.try_attach_consumer().unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
