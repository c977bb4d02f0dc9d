//! Legacy SSE client transport.
//!
//! Connects to the server's SSE endpoint, waits for the initial
//! `endpoint` event naming the paired message URL, then POSTs frames
//! there. Every reply arrives on the pre-opened stream and is correlated
//! by JSON-RPC id through the pending registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use url::Url;

use crate::client::pending::PendingRequests;
use crate::client::sse::SseParser;
use crate::client::{ClientTransport, NotificationHandler, RequestOptions, effective_timeout, into_result};
use crate::config::defaults;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Message, Notification, Request, methods};

/// How long to wait for the server to announce the message endpoint.
const ENDPOINT_WAIT: Duration = Duration::from_secs(10);

/// Client half of the legacy dual-endpoint SSE transport.
pub struct SseClientTransport {
    http: reqwest::Client,
    message_url: Arc<RwLock<Option<Url>>>,
    pending: Arc<PendingRequests>,
    handler: Arc<RwLock<Option<NotificationHandler>>>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    request_timeout: Duration,
    closed: Arc<AtomicBool>,
}

impl SseClientTransport {
    /// Connect to the SSE endpoint and wait for the endpoint announcement.
    pub async fn connect(sse_url: &str) -> ClientResult<Arc<Self>> {
        let base = Url::parse(sse_url)
            .map_err(|err| ClientError::protocol(format!("invalid SSE url: {err}")))?;
        let http = reqwest::Client::builder().build()?;

        let response = http
            .get(base.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::transport(format!(
                "SSE endpoint returned {}",
                response.status()
            )));
        }

        let transport = Arc::new(Self {
            http,
            message_url: Arc::new(RwLock::new(None)),
            pending: Arc::new(PendingRequests::new()),
            handler: Arc::new(RwLock::new(None)),
            reader: Mutex::new(None),
            request_timeout: defaults::REQUEST_TIMEOUT,
            closed: Arc::new(AtomicBool::new(false)),
        });

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_stream(
            response,
            base,
            Arc::clone(&transport.message_url),
            Arc::clone(&transport.pending),
            Arc::clone(&transport.handler),
            endpoint_tx,
        ));
        *transport.reader.lock().expect("reader lock poisoned") = Some(reader);

        match tokio::time::timeout(ENDPOINT_WAIT, endpoint_rx).await {
            Ok(Ok(())) => Ok(transport),
            Ok(Err(_)) => Err(ClientError::protocol("stream closed before endpoint event")),
            Err(_) => Err(ClientError::protocol("no endpoint event within wait window")),
        }
    }

    fn message_url(&self) -> ClientResult<Url> {
        self.message_url
            .read()
            .expect("endpoint lock poisoned")
            .clone()
            .ok_or_else(|| ClientError::protocol("message endpoint not announced"))
    }

    /// Number of in-flight requests; diagnostic.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}

/// Pump the downstream SSE stream: the first `endpoint` event resolves
/// the message URL; later frames settle pending requests or fan out to
/// the notification handler.
async fn read_stream(
    response: reqwest::Response,
    base: Url,
    message_url: Arc<RwLock<Option<Url>>>,
    pending: Arc<PendingRequests>,
    handler: Arc<RwLock<Option<NotificationHandler>>>,
    endpoint_tx: oneshot::Sender<()>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut stream = response.bytes_stream();
    let mut parser = SseParser::new();

    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        for event in parser.feed(&chunk) {
            if event.event.as_deref() == Some("endpoint") {
                match base.join(event.data.trim()) {
                    Ok(url) => {
                        tracing::debug!(%url, "Discovered message endpoint");
                        *message_url.write().expect("endpoint lock poisoned") = Some(url);
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Unresolvable endpoint announcement");
                    }
                }
                continue;
            }

            match crate::protocol::decode_frame(&event.data) {
                Ok(Message::Notification(notification)) => {
                    if let Some(handler) = handler.read().expect("handler lock poisoned").as_ref()
                    {
                        handler(notification);
                    }
                }
                Ok(reply @ (Message::Response(_) | Message::Error(_))) => {
                    if let Some(id) = reply.id().cloned() {
                        pending.complete(&id, reply);
                    }
                }
                Ok(Message::Request(_)) => {
                    tracing::warn!("Ignoring server-initiated request on legacy stream");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Undecodable event on legacy stream");
                }
            }
        }
    }

    tracing::debug!("Legacy SSE stream ended");
    pending.drain_all(|| ClientError::transport("SSE stream closed"));
}

#[async_trait::async_trait]
impl ClientTransport for SseClientTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        opts: RequestOptions,
    ) -> ClientResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let url = self.message_url()?;
        let id = self.pending.next_id();
        let rx = self.pending.register(id);
        let frame = Message::Request(Request::new(id, method, params));

        let response = match self.http.post(url).json(&frame).send().await {
            Ok(response) => response,
            Err(err) => {
                self.pending.remove(id);
                return Err(err.into());
            }
        };
        if !response.status().is_success() {
            self.pending.remove(id);
            return Err(ClientError::transport(format!(
                "message endpoint returned {}",
                response.status()
            )));
        }

        let deadline = effective_timeout(self.request_timeout, opts.timeout);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => into_result(result?),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.remove(id);
                // Best-effort cancellation over the upstream endpoint.
                if let Ok(url) = self.message_url() {
                    let frame = Message::Notification(Notification::new(
                        methods::CANCELLED,
                        Some(json!({"requestId": id, "reason": "deadline exceeded"})),
                    ));
                    let http = self.http.clone();
                    tokio::spawn(async move {
                        let _ = http.post(url).json(&frame).send().await;
                    });
                }
                Err(ClientError::Timeout(deadline))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> ClientResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        let url = self.message_url()?;
        let frame = Message::Notification(Notification::new(method, params));
        let response = self.http.post(url).json(&frame).send().await?;
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
            // Best-effort: the upstream endpoint may not be announced yet.
            if let Ok(url) = self.message_url() {
                let frame = Message::Notification(Notification::new(
                    methods::CANCELLED,
                    Some(json!({
                        "requestId": id,
                        "reason": reason.as_deref().unwrap_or("cancelled by caller"),
                    })),
                ));
                let http = self.http.clone();
                tokio::spawn(async move {
                    let _ = http.post(url).json(&frame).send().await;
                });
            }
        }
        Ok(())
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.handler.write().expect("handler lock poisoned") = Some(handler);
    }

    async fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(task) = self.reader.lock().expect("reader lock poisoned").take() {
            task.abort();
        }
        self.pending.drain_all(|| ClientError::Closed);
        Ok(())
    }
}

impl std::fmt::Debug for SseClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseClientTransport")
            .field("message_url", &*self.message_url.read().expect("endpoint lock poisoned"))
            .finish()
    }
}
