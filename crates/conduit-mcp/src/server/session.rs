//! Session identity, activity tracking, and expiry.
//!
//! Each session owns a data bag for handler state, a bounded outbound
//! channel for server-initiated frames, and a monotone event-id counter
//! shared by every SSE stream attached to the session. Channel overflow
//! policy is block-producer-with-timeout: a producer waits up to
//! [`defaults::NOTIFY_SEND_TIMEOUT`] for capacity, then the frame is
//! dropped and logged.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, mpsc};

use crate::config::defaults;
use crate::protocol::Message;
use crate::server::lifecycle::Lifecycle;

/// A single MCP session.
pub struct Session {
    /// Opaque 32-hex identifier, unique within the store.
    pub id: String,
    pub created_at: Instant,
    last_activity: RwLock<Instant>,
    data: Mutex<HashMap<String, Value>>,
    lifecycle: Lifecycle,
    outbound_tx: mpsc::Sender<Message>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<Message>>>,
    next_event_id: AtomicU64,
}

impl Session {
    fn with_lifecycle(id: String, lifecycle: Lifecycle) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(defaults::NOTIFY_CHANNEL_CAPACITY);
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_activity: RwLock::new(now),
            data: Mutex::new(HashMap::new()),
            lifecycle,
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            next_event_id: AtomicU64::new(1),
        }
    }

    /// A session with a caller-chosen id and a gated lifecycle.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_lifecycle(id.into(), Lifecycle::new())
    }

    /// An ephemeral session for stateless request handling: permissive
    /// lifecycle, never stored.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self::with_lifecycle(new_session_id(), Lifecycle::permissive())
    }

    #[must_use]
    pub const fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Refresh the activity timestamp.
    pub async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    pub async fn last_activity(&self) -> Instant {
        *self.last_activity.read().await
    }

    pub async fn is_expired(&self, window: Duration) -> bool {
        self.last_activity.read().await.elapsed() > window
    }

    /// Run a closure over the session's data bag under its mutex.
    pub async fn with_data<R>(&self, f: impl FnOnce(&mut HashMap<String, Value>) -> R) -> R {
        let mut data = self.data.lock().await;
        f(&mut data)
    }

    /// Queue an outbound frame on the session channel. Blocks up to the
    /// overflow timeout when the channel is full; returns false once the
    /// frame was dropped.
    pub async fn push_outbound(&self, message: Message) -> bool {
        match self
            .outbound_tx
            .send_timeout(message, defaults::NOTIFY_SEND_TIMEOUT)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(session_id = %self.id, error = %err, "Dropping outbound frame");
                false
            }
        }
    }

    /// Claim the outbound channel for a consumer stream. Fails while
    /// another stream is attached.
    pub fn try_attach_consumer(&self) -> Option<OwnedMutexGuard<mpsc::Receiver<Message>>> {
        Arc::clone(&self.outbound_rx).try_lock_owned().ok()
    }

    /// Next SSE event id; monotone for the session's lifetime.
    pub fn next_event_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

/// Generate a session id: 128 bits from the OS random source, hex-encoded.
#[must_use]
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// In-memory session store with a background expiry sweep.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    expiry: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(expiry: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), expiry }
    }

    /// Create and register a new session.
    pub async fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(new_session_id()));
        self.sessions.write().await.insert(session.id.clone(), Arc::clone(&session));
        tracing::info!(session_id = %session.id, "Created session");
        session
    }

    /// Register a session under a fixed id (the stdio transport's single
    /// `"stdio"` session).
    pub async fn insert(&self, session: Arc<Session>) {
        self.sessions.write().await.insert(session.id.clone(), session);
    }

    /// Look up a session, refreshing its activity timestamp on a hit.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(id).cloned();
        if let Some(ref session) = session {
            session.touch().await;
        }
        session
    }

    /// Terminate and remove a session. Returns false for unknown ids, so a
    /// repeated terminate reports failure rather than succeeding twice.
    pub async fn terminate(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(session) => {
                session.lifecycle().terminate();
                tracing::info!(session_id = %id, "Terminated session");
                true
            }
            None => false,
        }
    }

    pub async fn list_active(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Snapshot of the active sessions, for broadcast.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove sessions idle longer than the expiry window.
    pub async fn sweep(&self) -> usize {
        let mut stale = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if session.is_expired(self.expiry).await {
                    stale.push(id.clone());
                }
            }
        }

        let count = stale.len();
        if count > 0 {
            let mut sessions = self.sessions.write().await;
            for id in stale {
                if let Some(session) = sessions.remove(&id) {
                    session.lifecycle().terminate();
                    tracing::info!(session_id = %id, "Swept expired session");
                }
            }
        }
        count
    }

    /// Start the background sweep task.
    pub fn spawn_sweeper(self: Arc<Self>) {
        let store = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(defaults::SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let swept = store.sweep().await;
                if swept > 0 {
                    tracing::debug!(count = swept, "Session sweep completed");
                }
            }
        });
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").field("expiry", &self.expiry).finish()
    }
}
