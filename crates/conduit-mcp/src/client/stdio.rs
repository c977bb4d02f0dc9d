//! Stdio client transport: supervises a child-process MCP server.
//!
//! Frames are newline-delimited JSON on the child's stdin/stdout; stderr
//! is drained to the log. A state machine tracks the connection:
//! `NotStarted → Starting` on spawn, `Starting → Initialized` on the
//! first successful initialize reply, `→ Disconnected` on exit or close,
//! `→ Failed` on spawn or framing errors. The first send auto-starts the
//! child. Close is idempotent: stdin EOF, a bounded grace wait, then
//! kill, drain, `Disconnected`.

use std::sync::{Arc, Mutex as StdMutex, RwLock};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc};

use crate::client::pending::PendingRequests;
use crate::client::{ClientTransport, NotificationHandler, RequestOptions, effective_timeout, into_result};
use crate::config::{StdioClientConfig, defaults};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Message, Notification, Request, methods};

const CHANNEL_CAPACITY: usize = 128;

/// Connection lifecycle of the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotStarted,
    Starting,
    Initialized,
    Disconnected,
    Failed,
}

struct Inner {
    child: Option<tokio::process::Child>,
    outgoing_tx: Option<mpsc::Sender<Message>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Client transport over a spawned child process.
pub struct StdioTransport {
    config: StdioClientConfig,
    inner: Mutex<Inner>,
    state: Arc<StdMutex<ConnectionState>>,
    pending: Arc<PendingRequests>,
    handler: Arc<RwLock<Option<NotificationHandler>>>,
}

impl StdioTransport {
    #[must_use]
    pub fn new(config: StdioClientConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: Mutex::new(Inner { child: None, outgoing_tx: None, tasks: Vec::new() }),
            state: Arc::new(StdMutex::new(ConnectionState::NotStarted)),
            pending: Arc::new(PendingRequests::new()),
            handler: Arc::new(RwLock::new(None)),
        })
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Number of in-flight requests; diagnostic.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn set_state(state: &Arc<StdMutex<ConnectionState>>, next: ConnectionState) {
        *state.lock().expect("state lock poisoned") = next;
    }

    /// Hand out the writer, spawning the child first if necessary.
    async fn ensure_started(&self) -> ClientResult<mpsc::Sender<Message>> {
        let mut inner = self.inner.lock().await;

        match self.state() {
            ConnectionState::Starting | ConnectionState::Initialized => {
                if let Some(tx) = &inner.outgoing_tx {
                    return Ok(tx.clone());
                }
                // State says running but the writer is gone; fail fast.
                return Err(ClientError::Closed);
            }
            ConnectionState::Disconnected => return Err(ClientError::Closed),
            ConnectionState::Failed => {
                return Err(ClientError::transport("transport previously failed"));
            }
            ConnectionState::NotStarted => {}
        }

        tracing::debug!(command = %self.config.command, "Spawning MCP server process");

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                Self::set_state(&self.state, ConnectionState::Failed);
                return Err(ClientError::transport(format!(
                    "failed to spawn {}: {err}",
                    self.config.command
                )));
            }
        };

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::transport("failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::transport("failed to capture child stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClientError::transport("failed to capture child stderr"))?;

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);

        // Writer: serialize frames onto the child's stdin. Ends (and drops
        // stdin, signalling EOF) once the sender side is gone.
        let writer = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(message) = outgoing_rx.recv().await {
                let frame = match serde_json::to_string(&message) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::error!(error = %err, "Failed to serialize outgoing frame");
                        continue;
                    }
                };
                if stdin.write_all(frame.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    tracing::error!("Failed to write to child stdin");
                    break;
                }
            }
        });

        // Reader: correlate replies, fan out notifications. EOF means the
        // child is gone; every pending request fails with a transport
        // error and later sends fail fast.
        let reader = {
            let pending = Arc::clone(&self.pending);
            let handler = Arc::clone(&self.handler);
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match crate::protocol::decode_frame(&line) {
                        Ok(reply @ (Message::Response(_) | Message::Error(_))) => {
                            if let Some(id) = reply.id().cloned() {
                                pending.complete(&id, reply);
                            }
                        }
                        Ok(Message::Notification(notification)) => {
                            if let Some(handler) =
                                handler.read().expect("handler lock poisoned").as_ref()
                            {
                                handler(notification);
                            }
                        }
                        Ok(Message::Request(_)) => {
                            tracing::warn!("Ignoring request frame from server");
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, line, "Undecodable frame from server");
                        }
                    }
                }
                let already_closed = {
                    let state = state.lock().expect("state lock poisoned");
                    *state == ConnectionState::Disconnected
                };
                if !already_closed {
                    tracing::warn!("Server process closed its stdout");
                    Self::set_state(&state, ConnectionState::Disconnected);
                }
                pending.drain_all(|| ClientError::transport("server process exited"));
            })
        };

        // Stderr drain: the child's diagnostics go to our log, never the
        // protocol.
        let stderr_drain = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "mcp_server_stderr", "{line}");
            }
        });

        inner.child = Some(child);
        inner.outgoing_tx = Some(outgoing_tx.clone());
        inner.tasks = vec![writer, reader, stderr_drain];
        Self::set_state(&self.state, ConnectionState::Starting);

        Ok(outgoing_tx)
    }

    fn send_cancelled(&self, tx: &mpsc::Sender<Message>, id: i64, reason: &str) {
        let frame = Message::Notification(Notification::new(
            methods::CANCELLED,
            Some(json!({"requestId": id, "reason": reason})),
        ));
        let tx = tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(frame).await;
        });
    }
}

#[async_trait::async_trait]
impl ClientTransport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        opts: RequestOptions,
    ) -> ClientResult<Value> {
        let tx = self.ensure_started().await?;

        let id = self.pending.next_id();
        let rx = self.pending.register(id);
        let frame = Message::Request(Request::new(id, method, params));

        if tx.send(frame).await.is_err() {
            self.pending.remove(id);
            return Err(ClientError::Closed);
        }

        let deadline = effective_timeout(self.config.timeout, opts.timeout);
        let reply = match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(ClientError::Closed),
            Err(_) => {
                self.pending.remove(id);
                self.send_cancelled(&tx, id, "deadline exceeded");
                return Err(ClientError::Timeout(deadline));
            }
        };

        if method == methods::INITIALIZE && matches!(reply, Message::Response(_)) {
            Self::set_state(&self.state, ConnectionState::Initialized);
        }

        into_result(reply)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> ClientResult<()> {
        let tx = self.ensure_started().await?;
        let frame = Message::Notification(Notification::new(method, params));
        tx.send(frame).await.map_err(|_| ClientError::Closed)
    }

    async fn cancel(&self, id: i64, reason: Option<String>) -> ClientResult<()> {
        if self.pending.cancel(id) {
            // Best-effort: tell the child too, if it is still writable.
            let tx = self.inner.lock().await.outgoing_tx.clone();
            if let Some(tx) = tx {
                self.send_cancelled(
                    &tx,
                    id,
                    reason.as_deref().unwrap_or("cancelled by caller"),
                );
            }
        }
        Ok(())
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.handler.write().expect("handler lock poisoned") = Some(handler);
    }

    /// Close the child: EOF on stdin, bounded grace wait, then kill,
    /// drain, `Disconnected`. Safe to call repeatedly.
    async fn close(&self) -> ClientResult<()> {
        let mut inner = self.inner.lock().await;
        Self::set_state(&self.state, ConnectionState::Disconnected);

        // Dropping the writer handle closes the channel; the writer task
        // ends and drops stdin, signalling EOF to the child.
        inner.outgoing_tx = None;
        self.pending.drain_all(|| ClientError::Closed);

        if let Some(mut child) = inner.child.take() {
            match tokio::time::timeout(defaults::CLOSE_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    if status.success() {
                        tracing::debug!("Server process exited cleanly");
                    } else {
                        tracing::warn!(%status, "Server process exited with failure");
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "Failed to await server process");
                }
                Err(_) => {
                    tracing::warn!("Server process ignored EOF, killing it");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }

        for task in inner.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("command", &self.config.command)
            .field("state", &self.state())
            .finish()
    }
}
