//! Pending-request registry: correlates response frames to caller
//! futures by request id.
//!
//! The registry is a plain map behind one mutex; the lock only covers map
//! operations, never waits. Ids are generated monotonically per client.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::oneshot;

use crate::error::{ClientError, ClientResult};
use crate::protocol::{Message, RequestId};

type Waiter = oneshot::Sender<ClientResult<Message>>;

/// Client-side request correlation table.
pub struct PendingRequests {
    entries: Mutex<HashMap<i64, Waiter>>,
    next_id: AtomicI64,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()), next_id: AtomicI64::new(1) }
    }

    /// Allocate the next request id.
    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a waiter for the given id. Register before handing the
    /// frame to the transport so an immediate response cannot be lost.
    pub fn register(&self, id: i64) -> oneshot::Receiver<ClientResult<Message>> {
        let (tx, rx) = oneshot::channel();
        let previous = self.entries.lock().expect("pending lock poisoned").insert(id, tx);
        debug_assert!(previous.is_none(), "request id reused while pending");
        rx
    }

    /// Resolve the waiter for a response frame. Unknown or non-numeric ids
    /// are logged and dropped.
    pub fn complete(&self, id: &RequestId, message: Message) -> bool {
        let Some(id) = id.as_number() else {
            tracing::warn!(%id, "Response with non-numeric id, no matching pending request");
            return false;
        };
        let waiter = self.entries.lock().expect("pending lock poisoned").remove(&id);
        match waiter {
            Some(tx) => {
                // The receiver may have given up; that is not an error.
                let _ = tx.send(Ok(message));
                true
            }
            None => {
                tracing::warn!(id, "No pending request for response");
                false
            }
        }
    }

    /// Drop the entry for a timed-out request.
    pub fn remove(&self, id: i64) -> bool {
        self.entries.lock().expect("pending lock poisoned").remove(&id).is_some()
    }

    /// Cancel one in-flight request from the caller's side: the entry is
    /// removed and its waiter resolves with [`ClientError::Cancelled`].
    /// Returns false when nothing was pending under the id.
    pub fn cancel(&self, id: i64) -> bool {
        let waiter = self.entries.lock().expect("pending lock poisoned").remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Err(ClientError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Fail every in-flight request, e.g. when the transport closes.
    pub fn drain_all(&self, err: impl Fn() -> ClientError) {
        let drained: Vec<Waiter> = {
            let mut entries = self.entries.lock().expect("pending lock poisoned");
            entries.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(err()));
        }
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("pending lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}
