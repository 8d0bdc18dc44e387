//! In-process mock of the Sentinel uploader API.

#![allow(dead_code)]

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use sentinel_uploader::api::UploaderClient;
use sentinel_uploader::config::ApiEndpoints;

pub const UPLOADER_TOKEN: &str = "uploader-token";

/// Server-side behavior and recorded requests.
#[derive(Default)]
pub struct MockState {
    pub channels: Mutex<Vec<Value>>,
    /// Reject the long-lived token on the realtime token endpoint.
    pub reject_long_lived: AtomicBool,
    pub reject_refresh: AtomicBool,
    /// Session tokens rejected by heartbeat and submit.
    pub rejected_tokens: Mutex<HashSet<String>>,
    /// Session tokens rejected by the realtime subscribe call.
    pub rejected_subscribe_tokens: Mutex<HashSet<String>>,
    /// `PB_CONNECT` payloads to send instead of one fresh client id.
    /// An empty list sends no `PB_CONNECT` at all.
    pub connect_payloads: Mutex<Option<Vec<String>>>,
    /// Close the event stream after the initial events.
    pub end_stream: AtomicBool,
    /// Event data sent on the config topic after `PB_CONNECT`.
    pub config_events: Mutex<Vec<String>>,

    pub sessions_issued: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub stream_connects: AtomicUsize,
    pub heartbeats: Mutex<Vec<String>>,
    pub submissions: Mutex<Vec<(String, Value)>>,
    pub subscriptions: Mutex<Vec<(String, Value)>>,
}

impl MockState {
    pub fn with_channels(channels: Value) -> Self {
        let state = Self::default();
        if let Value::Array(list) = channels {
            *state.channels.lock().unwrap() = list;
        }
        state
    }

    pub fn reject_token(&self, token: &str) {
        self.rejected_tokens.lock().unwrap().insert(token.to_string());
    }

    pub fn reject_subscribe(&self, token: &str) {
        self.rejected_subscribe_tokens
            .lock()
            .unwrap()
            .insert(token.to_string());
    }

    pub fn set_connect_payloads(&self, payloads: &[&str]) {
        *self.connect_payloads.lock().unwrap() =
            Some(payloads.iter().map(ToString::to_string).collect());
    }

    pub fn heartbeat_tokens(&self) -> Vec<String> {
        self.heartbeats.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> Vec<(String, Value)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, Value)> {
        self.subscriptions.lock().unwrap().clone()
    }
}

pub struct MockServer {
    pub base_url: String,
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(state: MockState) -> Self {
        let state = Arc::new(state);
        let router = Router::new()
            .route("/api/uploader/realtime/token", post(realtime_token))
            .route("/api/uploader/session/refresh", post(session_refresh))
            .route("/api/uploader/config", get(config))
            .route("/api/uploader/heartbeat", post(heartbeat))
            .route("/api/uploader/submit", put(submit))
            .route("/api/realtime", get(realtime_stream).post(subscribe))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Mock server failed");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            handle,
        }
    }

    pub fn client(&self) -> UploaderClient {
        let endpoints = ApiEndpoints::from_base_url(&self.base_url).expect("valid base url");
        UploaderClient::new(reqwest::Client::new(), endpoints, UPLOADER_TOKEN)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Poll `check` until it holds or the timeout elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

fn session_json(token: &str) -> Value {
    json!({
        "token": token,
        "topic": "uploader.config",
        "expires_at": chrono::Utc::now().timestamp() + 3600,
        "refresh_after_seconds": 3600,
    })
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

async fn realtime_token(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    let token = headers.get("x-uploader-token").and_then(|v| v.to_str().ok());
    if state.reject_long_lived.load(Ordering::SeqCst) || token != Some(UPLOADER_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let n = state.sessions_issued.fetch_add(1, Ordering::SeqCst) + 1;
    Json(session_json(&format!("session-{n}"))).into_response()
}

async fn session_refresh(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    let n = state.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
    if state.reject_refresh.load(Ordering::SeqCst) || bearer(&headers).is_none() {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "expired"}))).into_response();
    }
    Json(session_json(&format!("refreshed-{n}"))).into_response()
}

async fn config(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if bearer(&headers).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let channels = state.channels.lock().unwrap().clone();
    Json(json!({ "channels": channels })).into_response()
}

fn authorized(state: &MockState, headers: &HeaderMap) -> Option<String> {
    let token = bearer(headers)?;
    if state.rejected_tokens.lock().unwrap().contains(&token) {
        return None;
    }
    Some(token)
}

async fn heartbeat(State(state): State<Arc<MockState>>, headers: HeaderMap) -> StatusCode {
    let Some(token) = authorized(&state, &headers) else {
        return StatusCode::UNAUTHORIZED;
    };
    state.heartbeats.lock().unwrap().push(token);
    StatusCode::OK
}

async fn submit(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let Some(token) = authorized(&state, &headers) else {
        return StatusCode::UNAUTHORIZED;
    };
    state.submissions.lock().unwrap().push((token, body));
    StatusCode::OK
}

async fn subscribe(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let Some(token) = bearer(&headers) else {
        return StatusCode::UNAUTHORIZED;
    };
    if state.rejected_subscribe_tokens.lock().unwrap().contains(&token) {
        return StatusCode::UNAUTHORIZED;
    }
    state.subscriptions.lock().unwrap().push((token, body));
    StatusCode::NO_CONTENT
}

async fn realtime_stream(
    State(state): State<Arc<MockState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let n = state.stream_connects.fetch_add(1, Ordering::SeqCst) + 1;
    let payloads = state
        .connect_payloads
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| vec![format!(r#"{{"clientId":"client-{n}"}}"#)]);
    let mut events: Vec<Result<Event, Infallible>> = payloads
        .into_iter()
        .map(|data| Ok(Event::default().event("PB_CONNECT").data(data)))
        .collect();
    for data in state.config_events.lock().unwrap().iter() {
        events.push(Ok(Event::default().event("uploader.config").data(data.clone())));
    }

    let initial = stream::iter(events);
    let stream = if state.end_stream.load(Ordering::SeqCst) {
        initial.boxed()
    } else {
        initial.chain(stream::pending()).boxed()
    };
    Sse::new(stream)
}
