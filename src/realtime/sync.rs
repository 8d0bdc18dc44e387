//! Channel config sync: keeps a realtime session alive across failures.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, ReconnectPolicy};
use super::sse::Event;
use super::stream::{SessionHandler, StreamClient};
use crate::api::{
    cancellable, format_payload, normalize_channels, ApiError, Channel, ConfigPayload, Session,
    UploaderClient,
};

/// Lifecycle notifications from the sync worker.
///
/// `epoch` identifies the reconnect attempt and strictly increases.
pub trait SyncObserver: Send + Sync {
    fn on_connected(&self, topic: &str, session: &Session, epoch: u64);

    /// Fires only for attempts that had connected.
    fn on_disconnected(&self, err: &ApiError, epoch: u64);

    /// The reconnect budget is spent and the worker is exiting.
    fn on_stopped(&self, err: ApiError);

    /// Credentials were rejected; the worker is exiting.
    fn on_auth_failure(&self, err: ApiError);

    /// Asked once the elapsed-time budget runs out. `true` grants another
    /// window without resetting the interval.
    fn should_continue_after_exhausted(&self, last_err: &ApiError, max_elapsed: Duration) -> bool;
}

/// Reconnect supervisor for the channel config stream.
#[derive(Debug, Clone)]
pub struct ChannelSync {
    client: UploaderClient,
    stream: StreamClient,
    policy: ReconnectPolicy,
}

impl ChannelSync {
    #[must_use]
    pub fn new(client: UploaderClient) -> Self {
        Self {
            stream: StreamClient::new(client.clone()),
            client,
            policy: ReconnectPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: StreamClient) -> Self {
        self.stream = stream;
        self
    }

    /// Spawn the sync worker.
    ///
    /// The receiver starts at the normalized `initial` list and only changes
    /// when a non-empty, different list arrives.
    pub fn start(
        self,
        initial: &[Channel],
        observer: Arc<dyn SyncObserver>,
        initial_session: Option<Session>,
        cancel: CancellationToken,
    ) -> (watch::Receiver<Vec<Channel>>, JoinHandle<()>) {
        let current = normalize_channels(initial);
        tracing::debug!(initial_count = current.len(), "Starting channel config sync");
        let (tx, rx) = watch::channel(current);

        let handle = tokio::spawn(async move {
            self.run(&tx, observer.as_ref(), initial_session, &cancel).await;
            if cancel.is_cancelled() {
                tracing::debug!("Channel config sync stopped: cancelled");
            } else {
                tracing::debug!("Channel config sync stopped");
            }
        });
        (rx, handle)
    }

    async fn run(
        &self,
        updates: &watch::Sender<Vec<Channel>>,
        observer: &dyn SyncObserver,
        initial_session: Option<Session>,
        cancel: &CancellationToken,
    ) {
        let mut backoff = Backoff::new(self.policy.clone());
        let mut prefetched = initial_session;
        let mut last_token = prefetched.as_ref().map(|s| s.token.clone());
        let mut epoch = 0u64;

        loop {
            epoch += 1;
            let attempt = self.run_config_session(
                prefetched.take(),
                updates,
                observer,
                epoch,
                cancel,
                &mut last_token,
            );
            let (err, connected) = attempt.await;

            if err.is_cancelled() || cancel.is_cancelled() {
                return;
            }
            if err.is_unauthorized() {
                observer.on_disconnected(&err, epoch);
                observer.on_auth_failure(err);
                return;
            }
            if err.is_expected_reconnect() && connected {
                tracing::debug!(error = %err, "Realtime channel sync reconnecting");
                backoff.reset();
                continue;
            }

            if err.is_expected_reconnect() {
                tracing::warn!(error = %err, "Realtime stream closed before connecting");
            } else {
                tracing::warn!(error = %err, "Realtime channel sync disconnected");
                self.fallback_fetch(last_token.as_deref(), updates, cancel).await;
            }

            let max_elapsed = self.policy.max_elapsed;
            let delay = match backoff.next_delay() {
                Some(delay) => delay,
                None if observer.should_continue_after_exhausted(&err, max_elapsed) => {
                    tracing::warn!(
                        error = %err,
                        max_elapsed_secs = max_elapsed.as_secs(),
                        "Realtime reconnect window extended due to recent successful API activity"
                    );
                    backoff.extend_window();
                    backoff.next_delay().unwrap_or(self.policy.max_interval)
                }
                None => {
                    tracing::warn!(error = %err, "Realtime channel sync stopped");
                    observer.on_stopped(err);
                    return;
                }
            };

            tracing::debug!(
                error = %err,
                next_retry_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying realtime channel sync"
            );
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one attempt, retrying once with a refreshed session on 401.
    ///
    /// Returns why the attempt ended and whether it ever connected.
    async fn run_config_session(
        &self,
        prefetched: Option<Session>,
        updates: &watch::Sender<Vec<Channel>>,
        observer: &dyn SyncObserver,
        epoch: u64,
        cancel: &CancellationToken,
        last_token: &mut Option<String>,
    ) -> (ApiError, bool) {
        let mut session = match prefetched {
            Some(session) => session,
            None => match cancellable(cancel, self.client.fetch_session()).await {
                Ok(session) => session,
                Err(err) => return (err, false),
            },
        };

        let mut refreshed = false;
        let mut connected = false;
        loop {
            tracing::debug!(
                topic = %session.topic,
                expires_at = session.expires_at,
                refresh_after_seconds = session.refresh_after_seconds,
                "Fetched realtime session"
            );

            let mut handler = ConfigHandler {
                session: &session,
                updates,
                observer,
                epoch,
                connected: false,
                last_token: &mut *last_token,
            };
            let err = self.stream.run_session(&session, &mut handler, cancel).await;
            connected |= handler.connected;

            if err.is_unauthorized() && !refreshed {
                tracing::warn!(
                    error = %err,
                    "Realtime stream unauthorized; attempting short session refresh"
                );
                let refresh = self.client.refresh_session(&session.token);
                match cancellable(cancel, refresh).await {
                    Ok(next) => {
                        tracing::info!(
                            "Realtime short session refresh succeeded; reconnecting stream"
                        );
                        session = next;
                        refreshed = true;
                        continue;
                    }
                    Err(refresh_err) => {
                        tracing::warn!(
                            error = %refresh_err,
                            "Realtime short session refresh failed"
                        );
                    }
                }
            }

            if connected && !err.is_unauthorized() && !err.is_cancelled() {
                observer.on_disconnected(&err, epoch);
            }
            return (err, connected);
        }
    }

    async fn fallback_fetch(
        &self,
        token: Option<&str>,
        updates: &watch::Sender<Vec<Channel>>,
        cancel: &CancellationToken,
    ) {
        tracing::debug!("Running fallback channel refresh");
        let Some(token) = token else {
            tracing::debug!("Skipping fallback channel refresh: no active session token");
            return;
        };

        match cancellable(cancel, self.client.fetch_channels(token)).await {
            Ok(channels) => {
                publish(updates, channels);
            }
            Err(err) => tracing::warn!(error = %err, "Fallback channel refresh failed"),
        }
    }
}

/// Publish a channel list, dropping empty and unchanged snapshots.
fn publish(updates: &watch::Sender<Vec<Channel>>, next: Vec<Channel>) -> bool {
    updates.send_if_modified(|current| {
        if next.is_empty() {
            tracing::debug!("Ignoring empty channel snapshot");
            return false;
        }
        if *current == next {
            tracing::debug!(count = next.len(), "Ignoring unchanged channel snapshot");
            return false;
        }
        tracing::debug!(count = next.len(), "Publishing channel config update");
        *current = next;
        true
    })
}

struct ConfigHandler<'a> {
    session: &'a Session,
    updates: &'a watch::Sender<Vec<Channel>>,
    observer: &'a dyn SyncObserver,
    epoch: u64,
    connected: bool,
    last_token: &'a mut Option<String>,
}

impl SessionHandler for ConfigHandler<'_> {
    fn on_connected(&mut self, topic: &str) {
        tracing::info!(topic, "Realtime config stream connected");
        self.connected = true;
        *self.last_token = Some(self.session.token.clone());
        self.observer.on_connected(topic, self.session, self.epoch);
    }

    fn on_message(&mut self, event: &Event) {
        let config: ConfigPayload = match serde_json::from_slice(&event.data) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode realtime config payload");
                return;
            }
        };
        let channels = normalize_channels(&config.channels);
        if channels.is_empty() {
            tracing::warn!("Realtime config payload had no channels");
            return;
        }
        tracing::debug!(count = channels.len(), "Received realtime channel payload");
        publish(self.updates, channels);
    }

    fn on_unhandled(&mut self, event: &Event) {
        tracing::debug!(
            event = %event.name,
            data = %format_payload(&event.data),
            "Ignoring realtime event"
        );
    }
}
