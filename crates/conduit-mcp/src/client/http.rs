//! Streamable HTTP client transport.
//!
//! POSTs frames to the single MCP endpoint and resolves each reply from
//! whichever mode the server chose: a JSON document, an SSE stream whose
//! final event carries the response, or a bare 202 for notifications. An
//! optional long-lived GET stream delivers session-wide notifications and
//! reconnects with exponential backoff, resuming from the last seen event
//! id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::client::pending::PendingRequests;
use crate::client::sse::SseParser;
use crate::client::{ClientTransport, NotificationHandler, RequestOptions, effective_timeout, into_result};
use crate::config::HttpClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Message, Notification, Request, RequestId, methods};

const SESSION_HEADER: &str = "mcp-session-id";

/// Client half of the streamable HTTP transport.
pub struct StreamableHttpTransport {
    http: reqwest::Client,
    config: HttpClientConfig,
    pending: Arc<PendingRequests>,
    session_id: Arc<RwLock<Option<String>>>,
    handler: Arc<RwLock<Option<NotificationHandler>>>,
    get_stream: Mutex<Option<tokio::task::JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
}

impl StreamableHttpTransport {
    pub fn new(config: HttpClientConfig) -> ClientResult<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            config,
            pending: Arc::new(PendingRequests::new()),
            session_id: Arc::new(RwLock::new(None)),
            handler: Arc::new(RwLock::new(None)),
            get_stream: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The session id recorded from the initialize response, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().expect("session lock poisoned").clone()
    }

    /// Number of in-flight requests; diagnostic.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn record_session_id(&self, headers: &HeaderMap) {
        if let Some(sid) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            let mut guard = self.session_id.write().expect("session lock poisoned");
            if guard.as_deref() != Some(sid) {
                tracing::debug!(session_id = %sid, "Recorded session id");
                *guard = Some(sid.to_string());
            }
        }
    }

    fn dispatch_notification(&self, notification: Notification, opts: &RequestOptions) {
        // Per-call handler sees the frame in addition to the session-wide
        // dispatcher, not instead of it.
        if let Some(handler) = self.handler.read().expect("handler lock poisoned").as_ref() {
            handler(notification.clone());
        }
        if let Some(handler) = &opts.on_notification {
            handler(notification);
        }
    }

    async fn post_frame(&self, message: &Message) -> ClientResult<reqwest::Response> {
        let mut request = self
            .http
            .post(&self.config.endpoint)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(sid) = self.session_id() {
            request = request.header(SESSION_HEADER, sid);
        }
        let response = request.send().await?;
        self.record_session_id(response.headers());
        Ok(response)
    }

    /// Run one POST exchange to completion: deliver the frame, then
    /// resolve the pending waiter from the chosen reply mode.
    async fn exchange(&self, id: i64, frame: &Message, opts: &RequestOptions) -> ClientResult<()> {
        let response = self.post_frame(frame).await?;
        let status = response.status();

        if status == StatusCode::ACCEPTED {
            return Err(ClientError::protocol("request acknowledged without a reply"));
        }
        if !status.is_success() {
            // 4xx may still carry a JSON-RPC body; surface it as the error.
            let body = response.text().await.unwrap_or_default();
            if let Ok(Message::Error(err)) = crate::protocol::decode_frame(&body) {
                return Err(ClientError::from(err.error));
            }
            return Err(ClientError::transport(format!("server returned {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("application/json") {
            let message: Message = serde_json::from_slice(&response.bytes().await?)
                .map_err(crate::protocol::CodecError::from)?;
            // The exchange itself is the correlation: whatever reply the
            // body carries settles this call. A mismatched id is noted.
            if message.id().and_then(RequestId::as_number) != Some(id) {
                tracing::warn!(expected = id, got = ?message.id(), "Reply id mismatch");
            }
            self.pending.complete(&RequestId::Number(id), message);
            return Ok(());
        }

        if content_type.starts_with("text/event-stream") {
            return self.consume_reply_stream(id, response, opts).await;
        }

        Err(ClientError::protocol(format!("unexpected content type: {content_type}")))
    }

    /// Consume a POST reply stream: notifications are dispatched as they
    /// arrive; the first response frame settles the call and ends the
    /// stream. A stream that ends without a response is a transport error.
    async fn consume_reply_stream(
        &self,
        id: i64,
        response: reqwest::Response,
        opts: &RequestOptions,
    ) -> ClientResult<()> {
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in parser.feed(&chunk) {
                let message = match crate::protocol::decode_frame(&event.data) {
                    Ok(message) => message,
                    Err(err) => {
                        tracing::warn!(error = %err, "Skipping undecodable stream event");
                        continue;
                    }
                };
                match message {
                    Message::Notification(notification) => {
                        self.dispatch_notification(notification, opts);
                    }
                    reply @ (Message::Response(_) | Message::Error(_)) => {
                        self.pending.complete(&RequestId::Number(id), reply);
                        return Ok(());
                    }
                    Message::Request(_) => {
                        tracing::warn!("Ignoring server-initiated request on reply stream");
                    }
                }
            }
        }

        self.pending.remove(id);
        Err(ClientError::protocol("reply stream ended without a response"))
    }

    /// Open the long-lived GET notification stream. Reconnects according
    /// to the configured retry policy, resuming from the last event id.
    pub fn start_listening(&self) {
        let task = tokio::spawn(run_get_stream(
            self.http.clone(),
            self.config.endpoint.clone(),
            self.config.retry.clone(),
            Arc::clone(&self.session_id),
            Arc::clone(&self.handler),
            Arc::clone(&self.closed),
        ));
        *self.get_stream.lock().expect("stream lock poisoned") = Some(task);
    }

    /// Best-effort `notifications/cancelled` after a local timeout.
    fn send_cancelled(&self, id: i64, reason: &str) {
        let frame = Message::Notification(Notification::new(
            methods::CANCELLED,
            Some(json!({"requestId": id, "reason": reason})),
        ));
        let http = self.http.clone();
        let endpoint = self.config.endpoint.clone();
        let session_id = self.session_id();
        tokio::spawn(async move {
            let mut request = http.post(&endpoint).json(&frame);
            if let Some(sid) = session_id {
                request = request.header(SESSION_HEADER, sid);
            }
            if let Err(err) = request.send().await {
                tracing::debug!(error = %err, "Failed to deliver cancellation");
            }
        });
    }
}

#[async_trait::async_trait]
impl ClientTransport for StreamableHttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        opts: RequestOptions,
    ) -> ClientResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let id = self.pending.next_id();
        let mut rx = self.pending.register(id);
        let frame = Message::Request(Request::new(id, method, params));

        let deadline = effective_timeout(self.config.request_timeout, opts.timeout);

        // The waiter races the exchange so a caller-side cancel unblocks
        // this call immediately instead of riding out the HTTP round trip.
        enum Wire {
            Exchanged(ClientResult<()>),
            TimedOut,
            Settled(ClientResult<Message>),
        }

        let wire = {
            let exchange = self.exchange(id, &frame, &opts);
            tokio::pin!(exchange);
            tokio::select! {
                exchanged = tokio::time::timeout(deadline, exchange) => match exchanged {
                    Ok(result) => Wire::Exchanged(result),
                    Err(_) => Wire::TimedOut,
                },
                settled = &mut rx => Wire::Settled(match settled {
                    Ok(result) => result,
                    Err(_) => Err(ClientError::Closed),
                }),
            }
        };

        match wire {
            Wire::Settled(result) => into_result(result?),
            Wire::TimedOut => {
                self.pending.remove(id);
                self.send_cancelled(id, "deadline exceeded");
                Err(ClientError::Timeout(deadline))
            }
            Wire::Exchanged(Err(err)) => {
                self.pending.remove(id);
                Err(err)
            }
            // The exchange resolved the waiter before returning.
            Wire::Exchanged(Ok(())) => match rx.await {
                Ok(result) => into_result(result?),
                Err(_) => Err(ClientError::Closed),
            },
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> ClientResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        let frame = Message::Notification(Notification::new(method, params));
        let response = self.post_frame(&frame).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::transport(format!(
                "notification rejected with {}",
                response.status()
            )))
        }
    }

    async fn cancel(&self, id: i64, reason: Option<String>) -> ClientResult<()> {
        if self.pending.cancel(id) {
            self.send_cancelled(id, reason.as_deref().unwrap_or("cancelled by caller"));
        }
        Ok(())
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.handler.write().expect("handler lock poisoned") = Some(handler);
    }

    /// Close: stop the GET stream, terminate the session with DELETE, and
    /// fail any in-flight requests. Safe to call more than once.
    async fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(task) = self.get_stream.lock().expect("stream lock poisoned").take() {
            task.abort();
        }

        if let Some(sid) = self.session_id() {
            let result = self
                .http
                .delete(&self.config.endpoint)
                .header(SESSION_HEADER, sid)
                .send()
                .await;
            match result {
                Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                    tracing::debug!("Session terminated");
                }
                Ok(response) => {
                    tracing::debug!(status = %response.status(), "Session delete refused");
                }
                Err(err) => {
                    tracing::debug!(error = %err, "Session delete failed");
                }
            }
        }

        self.pending.drain_all(|| ClientError::Closed);
        Ok(())
    }
}

/// The reconnect loop behind [`StreamableHttpTransport::start_listening`].
/// Owns clones of the transport state so the task holds no reference back
/// to the transport itself.
async fn run_get_stream(
    http: reqwest::Client,
    endpoint: String,
    retry: crate::config::RetryPolicy,
    session_id: Arc<RwLock<Option<String>>>,
    handler: Arc<RwLock<Option<NotificationHandler>>>,
    closed: Arc<AtomicBool>,
) {
    let mut attempt: u32 = 0;
    let mut last_event_id: Option<String> = None;

    loop {
        if closed.load(Ordering::SeqCst) {
            break;
        }
        match retry.delay(attempt) {
            Some(delay) => {
                if attempt > 0 {
                    tracing::warn!(?delay, attempt, "Reconnecting notification stream");
                    tokio::time::sleep(delay).await;
                }
            }
            None => {
                tracing::error!("Notification stream gave up after max attempts");
                break;
            }
        }

        let mut request =
            http.get(&endpoint).header(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(sid) = session_id.read().expect("session lock poisoned").clone() {
            request = request.header(SESSION_HEADER, sid);
        }
        if let Some(last) = &last_event_id {
            request = request.header("Last-Event-ID", last.clone());
        }

        let response = match request.send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Notification stream refused");
                attempt += 1;
                continue;
            }
            Err(err) => {
                tracing::warn!(error = %err, "Notification stream connect failed");
                attempt += 1;
                continue;
            }
        };

        tracing::debug!("Notification stream established");
        attempt = 0;

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();
        while let Some(chunk) = stream.next().await {
            let Ok(chunk) = chunk else { break };
            for event in parser.feed(&chunk) {
                if let Some(id) = &event.id {
                    last_event_id = Some(id.clone());
                }
                match crate::protocol::decode_frame(&event.data) {
                    Ok(Message::Notification(notification)) => {
                        if let Some(handler) =
                            handler.read().expect("handler lock poisoned").as_ref()
                        {
                            handler(notification);
                        }
                    }
                    Ok(_) => {
                        tracing::debug!("Ignoring non-notification frame on GET stream");
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Undecodable event on GET stream");
                    }
                }
            }
        }
        tracing::debug!("Notification stream ended");
        attempt += 1;
    }
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("endpoint", &self.config.endpoint)
            .field("session_id", &self.session_id())
            .finish()
    }
}
