//! API error types.

/// Errors produced by calls against the uploader API and the realtime stream.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// The server rejected the credentials (401/403).
    #[error("unauthorized: HTTP {status}")]
    Unauthorized {
        /// HTTP status code.
        status: u16,
    },

    /// Any other non-2xx response.
    #[error("HTTP {status}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
    },

    /// The response body was malformed or incomplete.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// No session token is available for an authenticated call.
    #[error("missing uploader session token")]
    MissingSessionToken,

    /// Transport-level failure (connect, read, timeout).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The realtime session reached its scheduled refresh boundary.
    #[error("realtime session refresh due")]
    SessionRefreshDue,

    /// The realtime event stream reached end of input.
    #[error("realtime stream ended")]
    StreamEnded,
}

impl ApiError {
    /// Map a non-success HTTP status to the matching error.
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        let status = status.as_u16();
        if status == 401 || status == 403 {
            Self::Unauthorized { status }
        } else {
            Self::HttpStatus { status }
        }
    }

    /// Returns true if this error should trigger refresh or re-auth logic.
    ///
    /// A missing session token counts: the call could not be authorized.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::MissingSessionToken)
    }

    /// Returns true for stream endings that are a normal reconnect cause.
    #[must_use]
    pub fn is_expected_reconnect(&self) -> bool {
        matches!(self, Self::SessionRefreshDue | Self::StreamEnded)
    }

    /// Returns true if the operation was cancelled by the caller.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
