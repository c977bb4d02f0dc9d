//! Session lifecycle: the initialize handshake state machine.

use std::sync::Mutex;

use crate::protocol::{RpcError, codes, methods};

/// Handshake states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Initialized,
    Terminated,
}

/// Per-session (or per-process, for stateless deployments) handshake
/// tracker. A permissive lifecycle admits every request; it backs
/// stateless HTTP where no handshake can be tracked across requests.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
    gated: bool,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self { state: Mutex::new(LifecycleState::Uninitialized), gated: true }
    }

    /// A lifecycle that accepts any request in any order.
    #[must_use]
    pub fn permissive() -> Self {
        Self { state: Mutex::new(LifecycleState::Initialized), gated: false }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().expect("lifecycle lock poisoned")
    }

    /// `initialize` received. Moves `Uninitialized` to `Initializing`.
    pub fn begin_initialize(&self) -> Result<(), RpcError> {
        if !self.gated {
            return Ok(());
        }
        let mut state = self.state.lock().expect("lifecycle lock poisoned");
        match *state {
            LifecycleState::Uninitialized => {
                *state = LifecycleState::Initializing;
                Ok(())
            }
            _ => Err(RpcError::new(codes::ALREADY_INITIALIZED, "session already initialized")),
        }
    }

    /// `notifications/initialized` received. Moves `Initializing` to
    /// `Initialized`; silently ignored in any other state.
    pub fn mark_initialized(&self) -> bool {
        let mut state = self.state.lock().expect("lifecycle lock poisoned");
        if *state == LifecycleState::Initializing {
            *state = LifecycleState::Initialized;
            true
        } else {
            false
        }
    }

    /// Gate for every method other than `initialize`. `ping` is exempt.
    pub fn check_ready(&self, method: &str) -> Result<(), RpcError> {
        if !self.gated || method == methods::PING {
            return Ok(());
        }
        let state = self.state.lock().expect("lifecycle lock poisoned");
        if *state == LifecycleState::Initialized {
            Ok(())
        } else {
            Err(RpcError::new(codes::NOT_INITIALIZED, "session not initialized"))
        }
    }

    pub fn terminate(&self) {
        *self.state.lock().expect("lifecycle lock poisoned") = LifecycleState::Terminated;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);

        lifecycle.begin_initialize().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Initializing);

        assert!(lifecycle.mark_initialized());
        assert_eq!(lifecycle.state(), LifecycleState::Initialized);
        lifecycle.check_ready("tools/list").unwrap();
    }

    #[test]
    fn test_double_initialize_rejected() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_initialize().unwrap();
        let err = lifecycle.begin_initialize().unwrap_err();
        assert_eq!(err.code, codes::ALREADY_INITIALIZED);
        assert_eq!(err.message, "session already initialized");
    }

    #[test]
    fn test_requests_gated_until_initialized() {
        let lifecycle = Lifecycle::new();
        let err = lifecycle.check_ready("tools/call").unwrap_err();
        assert_eq!(err.code, codes::NOT_INITIALIZED);
        assert_eq!(err.message, "session not initialized");

        // ping is always allowed.
        lifecycle.check_ready("ping").unwrap();

        // The initialized notification out of order is ignored, not an error.
        assert!(!lifecycle.mark_initialized());
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn test_permissive_lifecycle() {
        let lifecycle = Lifecycle::permissive();
        lifecycle.check_ready("tools/call").unwrap();
        lifecycle.begin_initialize().unwrap();
        lifecycle.begin_initialize().unwrap();
    }

    #[test]
    fn test_terminated_blocks_requests() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_initialize().unwrap();
        lifecycle.mark_initialized();
        lifecycle.terminate();
        assert!(lifecycle.check_ready("tools/list").is_err());
    }
}
