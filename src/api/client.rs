//! HTTP client for the uploader API.

use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;

use super::channels::{normalize_channels, Channel, ConfigPayload};
use super::error::ApiError;
use super::payload::format_payload;
use super::transport::{check_status, read_capped, MAX_JSON_BODY, REQUEST_TIMEOUT};
use crate::config::ApiEndpoints;

/// Body of `PUT /uploader/submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitPayload {
    pub text: String,
    pub channel_id: String,
}

/// Client for the uploader REST endpoints.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct UploaderClient {
    pub(crate) http: Client,
    pub(crate) endpoints: Arc<ApiEndpoints>,
    pub(crate) api_token: String,
}

impl UploaderClient {
    /// Create a client from an HTTP client, endpoints and the long-lived
    /// uploader token.
    #[must_use]
    pub fn new(http: Client, endpoints: ApiEndpoints, api_token: impl Into<String>) -> Self {
        Self {
            http,
            endpoints: Arc::new(endpoints),
            api_token: api_token.into(),
        }
    }

    /// The endpoints this client talks to.
    #[must_use]
    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    /// Fetch the normalized channel configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::MissingSessionToken`] without a request when the
    /// token is blank, otherwise the mapped HTTP or decode failure.
    pub async fn fetch_channels(&self, session_token: &str) -> Result<Vec<Channel>, ApiError> {
        let token = bearer_token(session_token)?;
        tracing::debug!(url = %self.endpoints.config_url, "Fetching channel config");

        let response = self
            .http
            .get(&self.endpoints.config_url)
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        tracing::debug!(status = %response.status(), "GET {}", self.endpoints.config_url);
        let mut response = check_status(response, "config request").await?;

        let data = read_capped(&mut response, MAX_JSON_BODY).await?;
        let config: ConfigPayload = serde_json::from_slice(&data).map_err(|e| {
            tracing::warn!(
                url = %self.endpoints.config_url,
                error = %e,
                response = %format_payload(&data),
                "Invalid config JSON"
            );
            ApiError::InvalidResponse(format!("invalid config JSON: {e}"))
        })?;

        let channels = normalize_channels(&config.channels);
        tracing::debug!(count = channels.len(), "Channel config loaded");
        Ok(channels)
    }

    /// Send a liveness heartbeat.
    ///
    /// # Errors
    ///
    /// Same failure mapping as [`UploaderClient::fetch_channels`].
    pub async fn heartbeat(&self, session_token: &str) -> Result<(), ApiError> {
        let token = bearer_token(session_token)?;
        let response = self
            .http
            .post(&self.endpoints.heartbeat_url)
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        tracing::debug!(status = %response.status(), "POST {}", self.endpoints.heartbeat_url);
        check_status(response, "heartbeat").await?;

        tracing::debug!("Heartbeat accepted");
        Ok(())
    }

    /// Submit one report line for a channel.
    ///
    /// # Errors
    ///
    /// Same failure mapping as [`UploaderClient::fetch_channels`].
    pub async fn submit(
        &self,
        session_token: &str,
        payload: &SubmitPayload,
    ) -> Result<(), ApiError> {
        let token = bearer_token(session_token)?;
        tracing::debug!(channel_id = %payload.channel_id, "Submitting report");

        let response = self
            .http
            .put(&self.endpoints.submit_url)
            .bearer_auth(token)
            .json(payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        tracing::debug!(status = %response.status(), "PUT {}", self.endpoints.submit_url);
        check_status(response, "submit").await?;

        tracing::debug!(channel_id = %payload.channel_id, "Report submit accepted");
        Ok(())
    }
}

/// Trim a session token, rejecting blanks.
pub(crate) fn bearer_token(session_token: &str) -> Result<&str, ApiError> {
    let token = session_token.trim();
    if token.is_empty() {
        return Err(ApiError::MissingSessionToken);
    }
    Ok(token)
}
