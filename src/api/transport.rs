//! Shared HTTP plumbing: client construction, status checks, capped body reads.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;

use super::error::ApiError;
use super::payload::format_payload;

/// Connection timeout for HTTP requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall timeout for request/response calls.
///
/// Applied per request so the realtime stream can stay open indefinitely.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap for JSON response bodies.
pub(crate) const MAX_JSON_BODY: usize = 1 << 20;

/// Cap for error bodies that are only logged.
pub(crate) const MAX_ERROR_BODY: usize = 2048;

/// Build an HTTP client with the connect timeout configured.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client() -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(ApiError::Transport)
}

/// Race a call against a cancellation token.
///
/// Dropping the losing future abandons any in-flight request.
///
/// # Errors
///
/// Returns [`ApiError::Cancelled`] if the token fires first, otherwise the
/// call's own result.
pub async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        () = cancel.cancelled() => Err(ApiError::Cancelled),
        result = call => result,
    }
}

/// Read at most `limit` bytes of a response body.
pub(crate) async fn read_capped(
    response: &mut Response,
    limit: usize,
) -> Result<Vec<u8>, ApiError> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit.saturating_sub(body.len());
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= limit {
            break;
        }
    }
    Ok(body)
}

/// Turn an error status into an [`ApiError`], logging the body.
///
/// Successful responses are passed through untouched.
pub(crate) async fn check_status(mut response: Response, what: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = read_capped(&mut response, MAX_ERROR_BODY)
        .await
        .unwrap_or_default();
    tracing::warn!(
        status = %status,
        response = %format_payload(&body),
        "{what} failed"
    );
    Err(ApiError::from_status(status))
}
