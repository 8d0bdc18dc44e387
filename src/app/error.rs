//! Orchestration error types.

use crate::api::ApiError;
use crate::logs::WatcherError;

/// Reasons the uploader stops or fails to start.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// The long-lived token was rejected.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(#[source] ApiError),

    /// The realtime supervisor ran out of reconnect budget.
    #[error("Realtime reconnect exhausted: {0}")]
    ReconnectExhausted(#[source] ApiError),

    /// The initial realtime session could not be obtained.
    #[error("Realtime startup connect failed: {0}")]
    StartupConnect(#[source] ApiError),

    /// The first realtime handshake did not complete in time.
    #[error("Realtime handshake timed out")]
    HandshakeTimeout,

    /// The server returned an empty channel list.
    #[error("No channels configured")]
    NoChannels,

    #[error("{0}")]
    LogDirectory(String),

    #[error("Failed to fetch channels: {0}")]
    ChannelFetch(#[source] ApiError),

    /// An API call failed after the session retry policy ran.
    #[error("Uploader API call failed: {0}")]
    Client(#[source] ApiError),

    #[error("Log monitor failed: {0}")]
    Monitor(#[from] WatcherError),

    /// No session token is held yet.
    #[error("Uploader session unavailable")]
    SessionUnavailable,
}

impl AppError {
    /// True when the run stopped because credentials were rejected.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }
}
