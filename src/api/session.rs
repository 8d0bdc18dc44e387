//! Realtime session credentials and the calls that mint them.

use serde::{Deserialize, Serialize};

use super::client::{bearer_token, UploaderClient};
use super::error::ApiError;
use super::transport::{check_status, read_capped, MAX_JSON_BODY, REQUEST_TIMEOUT};

/// Topic used when the server does not name one.
pub const DEFAULT_TOPIC: &str = "uploader.config";

/// Short-lived credential plus the topic it authorizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub topic: String,
    /// Expiry as unix seconds, 0 when unknown.
    #[serde(default)]
    pub expires_at: i64,
    /// Server hint for when to refresh, 0 when absent.
    #[serde(default)]
    pub refresh_after_seconds: i64,
}

impl Session {
    /// Validate a decoded session and fill in the default topic.
    fn finish(mut self) -> Result<Self, ApiError> {
        if self.token.trim().is_empty() {
            return Err(ApiError::InvalidResponse("missing realtime token".to_string()));
        }
        if self.topic.trim().is_empty() {
            self.topic = DEFAULT_TOPIC.to_string();
        }
        Ok(self)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeBody<'a> {
    client_id: &'a str,
    subscriptions: &'a [String],
}

/// Primary topic followed by extra topics, trimmed and deduplicated.
#[must_use]
pub fn build_subscribe_topics(primary: &str, extra: &[String]) -> Vec<String> {
    let mut topics: Vec<String> = Vec::with_capacity(extra.len() + 1);
    for topic in std::iter::once(primary).chain(extra.iter().map(String::as_str)) {
        let topic = topic.trim();
        if topic.is_empty() || topics.iter().any(|t| t == topic) {
            continue;
        }
        topics.push(topic.to_string());
    }
    topics
}

impl UploaderClient {
    /// Exchange the long-lived uploader token for a realtime session.
    ///
    /// # Errors
    ///
    /// [`ApiError::Unauthorized`] if the token is rejected,
    /// [`ApiError::InvalidResponse`] if the body has no usable token.
    pub async fn fetch_session(&self) -> Result<Session, ApiError> {
        let url = &self.endpoints.realtime_token_url;
        tracing::debug!(url = %url, "Requesting realtime session token");

        let response = self
            .http
            .post(url)
            .header("X-Uploader-Token", &self.api_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{}")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let session = decode_session(response, "realtime token request").await?;

        tracing::debug!(
            topic = %session.topic,
            expires_at = session.expires_at,
            refresh_after_seconds = session.refresh_after_seconds,
            "Realtime session token acquired"
        );
        Ok(session)
    }

    /// Refresh a session using the current session token as bearer.
    ///
    /// # Errors
    ///
    /// [`ApiError::MissingSessionToken`] without a request when the token is
    /// blank, otherwise the same mapping as [`UploaderClient::fetch_session`].
    pub async fn refresh_session(&self, session_token: &str) -> Result<Session, ApiError> {
        let token = bearer_token(session_token)?;
        let url = &self.endpoints.session_refresh_url;

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        tracing::debug!(status = %response.status(), "POST {url}");
        decode_session(response, "session refresh").await
    }

    /// Subscribe a realtime client id to topics.
    ///
    /// # Errors
    ///
    /// Returns the mapped HTTP failure if the server rejects the subscription.
    pub async fn subscribe(
        &self,
        client_id: &str,
        session_token: &str,
        topics: &[String],
    ) -> Result<(), ApiError> {
        let token = bearer_token(session_token)?;
        tracing::debug!(client_id, ?topics, "Subscribing realtime topics");

        let response = self
            .http
            .post(&self.endpoints.realtime_url)
            .bearer_auth(token)
            .json(&SubscribeBody {
                client_id,
                subscriptions: topics,
            })
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        check_status(response, "realtime subscribe").await?;
        Ok(())
    }
}

async fn decode_session(response: reqwest::Response, what: &str) -> Result<Session, ApiError> {
    let mut response = check_status(response, what).await?;
    let data = read_capped(&mut response, MAX_JSON_BODY).await?;
    let session: Session = serde_json::from_slice(&data)
        .map_err(|e| ApiError::InvalidResponse(format!("invalid {what} response: {e}")))?;
    session.finish()
}
