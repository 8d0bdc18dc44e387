//! Shared run state: the session token holder and the stop latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use super::error::AppError;

#[derive(Debug, Default)]
struct SessionInner {
    token: String,
    connected: bool,
}

/// Current uploader session token and whether the realtime stream is up.
#[derive(Debug, Default)]
pub struct SessionState {
    inner: RwLock<SessionInner>,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the token of a session whose stream just connected.
    pub fn set_connected_session(&self, token: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.connected = true;
        inner.token = token.trim().to_string();
    }

    pub fn set_token(&self, token: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.token = token.trim().to_string();
    }

    /// Mark the stream down. The token is kept for REST calls.
    pub fn clear_connection(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .connected = false;
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        (!inner.token.is_empty()).then(|| inner.token.clone())
    }

    #[must_use]
    pub fn token_if_connected(&self) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        (inner.connected && !inner.token.is_empty()).then(|| inner.token.clone())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connected
    }
}

/// Why a run is stopping. The first reason recorded wins.
#[derive(Debug, Default)]
pub struct StopState {
    auth_shutdown: AtomicBool,
    reason: Mutex<Option<AppError>>,
}

impl StopState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the auth shutdown. Returns false if it was already latched.
    pub fn latch_auth_shutdown(&self) -> bool {
        self.auth_shutdown
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_auth_shutdown(&self) -> bool {
        self.auth_shutdown.load(Ordering::Acquire)
    }

    pub fn set_reason(&self, reason: AppError) {
        let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    #[must_use]
    pub fn has_reason(&self) -> bool {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn take_reason(&self) -> Option<AppError> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state() {
        let state = SessionState::new();
        assert_eq!(state.token(), None);

        state.set_token("  first  ");
        assert_eq!(state.token().as_deref(), Some("first"));
        assert_eq!(state.token_if_connected(), None);

        state.set_connected_session("second");
        assert!(state.is_connected());
        assert_eq!(state.token_if_connected().as_deref(), Some("second"));

        state.clear_connection();
        assert_eq!(state.token_if_connected(), None);
        assert_eq!(state.token().as_deref(), Some("second"));
    }

    #[test]
    fn test_stop_state_first_reason_wins() {
        let stop = StopState::new();
        assert!(stop.latch_auth_shutdown());
        assert!(!stop.latch_auth_shutdown());
        assert!(stop.is_auth_shutdown());

        stop.set_reason(AppError::NoChannels);
        stop.set_reason(AppError::HandshakeTimeout);
        assert!(stop.has_reason());
        assert!(matches!(stop.take_reason(), Some(AppError::NoChannels)));
        assert!(stop.take_reason().is_none());
    }
}
