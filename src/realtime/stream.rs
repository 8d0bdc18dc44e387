//! One realtime session: connect, handshake, subscribe, dispatch.

use std::pin::pin;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::sse::{into_events, response_chunks, Event};
use crate::api::{
    build_subscribe_topics, cancellable, check_status, ApiError, Session, UploaderClient,
    DEFAULT_TOPIC,
};

/// Event name carrying the realtime client id.
pub const CONNECT_EVENT: &str = "PB_CONNECT";

/// How long before `expires_at` a session is refreshed.
pub const DEFAULT_REFRESH_LEAD: Duration = Duration::from_secs(10);

/// Refresh interval when the session carries no usable hint.
pub const DEFAULT_REFRESH_AFTER: Duration = Duration::from_secs(60);

/// Receives the events of one realtime session.
pub trait SessionHandler: Send {
    /// Subscription to `topic` succeeded for a new client id.
    fn on_connected(&mut self, topic: &str);

    /// An event named after the session topic arrived.
    fn on_message(&mut self, event: &Event);

    /// Any other named event arrived.
    fn on_unhandled(&mut self, event: &Event);
}

#[derive(Deserialize)]
struct ConnectPayload {
    #[serde(rename = "clientId", default)]
    client_id: String,
}

/// Time until a session should be refreshed.
///
/// `refresh_after_seconds` wins when positive. Otherwise the deadline is
/// `expires_at - lead` if that lies in the future, else
/// [`DEFAULT_REFRESH_AFTER`].
#[must_use]
pub fn refresh_deadline(session: &Session, lead: Duration, now_unix: i64) -> Duration {
    if let Ok(secs) = u64::try_from(session.refresh_after_seconds) {
        if secs > 0 {
            return Duration::from_secs(secs);
        }
    }

    if session.expires_at > 0 {
        let lead = if lead.is_zero() { DEFAULT_REFRESH_LEAD } else { lead };
        let lead_secs = i64::try_from(lead.as_secs()).unwrap_or(i64::MAX);
        let remaining = session
            .expires_at
            .saturating_sub(lead_secs)
            .saturating_sub(now_unix);
        if let Ok(secs) = u64::try_from(remaining) {
            if secs > 0 {
                return Duration::from_secs(secs);
            }
        }
    }

    DEFAULT_REFRESH_AFTER
}

/// Runs realtime sessions against the uploader API.
#[derive(Debug, Clone)]
pub struct StreamClient {
    client: UploaderClient,
    refresh_lead: Duration,
    extra_topics: Vec<String>,
}

impl StreamClient {
    #[must_use]
    pub fn new(client: UploaderClient) -> Self {
        Self {
            client,
            refresh_lead: DEFAULT_REFRESH_LEAD,
            extra_topics: Vec::new(),
        }
    }

    /// Set the lead time subtracted from `expires_at`.
    #[must_use]
    pub fn with_refresh_lead(mut self, lead: Duration) -> Self {
        self.refresh_lead = lead;
        self
    }

    /// Subscribe to these topics in addition to the session topic.
    #[must_use]
    pub fn with_extra_topics(mut self, topics: Vec<String>) -> Self {
        self.extra_topics = topics;
        self
    }

    /// Run one session until it ends and return why it ended.
    ///
    /// The result is never a success: a session always ends with
    /// [`ApiError::SessionRefreshDue`], [`ApiError::StreamEnded`],
    /// [`ApiError::Cancelled`] or a real failure.
    pub async fn run_session(
        &self,
        session: &Session,
        handler: &mut dyn SessionHandler,
        cancel: &CancellationToken,
    ) -> ApiError {
        let topic = if session.topic.trim().is_empty() {
            DEFAULT_TOPIC.to_string()
        } else {
            session.topic.clone()
        };
        let now = chrono::Utc::now().timestamp();
        let refresh_after = refresh_deadline(session, self.refresh_lead, now);
        tracing::debug!(
            topic = %topic,
            refresh_after_secs = refresh_after.as_secs(),
            "Starting realtime stream session"
        );

        let endpoints = self.client.endpoints();
        let request = self
            .client
            .http
            .get(&endpoints.realtime_url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send();
        let connected = cancellable(cancel, async { request.await.map_err(ApiError::from) });
        let response = match connected.await {
            Ok(response) => response,
            Err(err) => return err,
        };
        let response = match check_status(response, "realtime connect").await {
            Ok(response) => response,
            Err(err) => return err,
        };

        let mut events = pin!(into_events(response_chunks(response)));
        let refresh = tokio::time::sleep(refresh_after);
        let mut refresh = pin!(refresh);
        let mut client_id = String::new();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Stopping realtime stream session: cancelled");
                    return ApiError::Cancelled;
                }
                () = &mut refresh => {
                    tracing::debug!("Realtime stream refresh boundary reached");
                    return ApiError::SessionRefreshDue;
                }
                item = events.next() => {
                    let event = match item {
                        Some(Ok(event)) => event,
                        Some(Err(err)) => {
                            tracing::debug!(error = %err, "Realtime stream ended");
                            return err;
                        }
                        None => return ApiError::StreamEnded,
                    };

                    if event.name == CONNECT_EVENT {
                        let payload: ConnectPayload = match serde_json::from_slice(&event.data) {
                            Ok(payload) => payload,
                            Err(e) => {
                                return ApiError::InvalidResponse(format!(
                                    "invalid {CONNECT_EVENT} payload: {e}"
                                ));
                            }
                        };
                        if payload.client_id.is_empty() {
                            return ApiError::InvalidResponse(
                                "missing realtime client id".to_string(),
                            );
                        }
                        if payload.client_id == client_id {
                            tracing::debug!(
                                client_id = %client_id,
                                "Ignoring duplicate {CONNECT_EVENT} event"
                            );
                            continue;
                        }

                        client_id = payload.client_id;
                        let topics = build_subscribe_topics(&topic, &self.extra_topics);
                        let subscribed = cancellable(
                            cancel,
                            self.client.subscribe(&client_id, &session.token, &topics),
                        )
                        .await;
                        if let Err(err) = subscribed {
                            return err;
                        }
                        handler.on_connected(&topic);
                    } else if event.name == topic {
                        handler.on_message(&event);
                    } else {
                        handler.on_unhandled(&event);
                    }
                }
            }
        }
    }
}
