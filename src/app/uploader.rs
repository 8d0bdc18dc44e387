//! Uploader orchestration.
//!
//! Authenticates, loads channels, starts the realtime config sync and the
//! heartbeat, then runs the log monitor and submits its reports.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use super::error::AppError;
use super::state::{SessionState, StopState};
use crate::api::{cancellable, ApiError, Channel, Session, SubmitPayload, UploaderClient};
use crate::config::Options;
use crate::logs::{
    LogSelection, Monitor, MonitorObserver, MonitorOptions, ReportError, ReportEvent, WatcherError,
};
use crate::realtime::{
    ChannelSync, ReconnectPolicy, StreamClient, SyncObserver, DEFAULT_REFRESH_LEAD,
};
use crate::status::{
    ConnectionEvent, ConnectionStatus, LogStatusObserver, StatusObserver, StatusTracker,
};

/// Timing knobs for a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub heartbeat_interval: Duration,
    /// How long startup waits for the first realtime connect.
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub refresh_lead: Duration,
    /// Topics subscribed after the session's own topic.
    pub extra_topics: Vec<String>,
    /// Monitor tunables. Log location and channels are filled in per run.
    pub monitor: MonitorOptions,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
            refresh_lead: DEFAULT_REFRESH_LEAD,
            extra_topics: Vec::new(),
            monitor: MonitorOptions::default(),
        }
    }
}

/// The uploader application.
#[derive(Debug)]
pub struct UploaderApp {
    opts: Options,
    client: UploaderClient,
    settings: RunSettings,
    status: Arc<StatusTracker>,
    channels: Arc<watch::Sender<Vec<Channel>>>,
}

impl UploaderApp {
    #[must_use]
    pub fn new(opts: Options, client: UploaderClient) -> Self {
        let (channels, _) = watch::channel(Vec::new());
        Self {
            opts,
            client,
            settings: RunSettings::default(),
            status: Arc::new(StatusTracker::new(Arc::new(LogStatusObserver))),
            channels: Arc::new(channels),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the status observer. Resets the status.
    #[must_use]
    pub fn with_status_observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.status = Arc::new(StatusTracker::new(observer));
        self
    }

    #[must_use]
    pub fn status(&self) -> Option<ConnectionStatus> {
        self.status.current()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<Option<ConnectionStatus>> {
        self.status.subscribe()
    }

    /// Watch the active channel list.
    #[must_use]
    pub fn subscribe_channels(&self) -> watch::Receiver<Vec<Channel>> {
        self.channels.subscribe()
    }

    /// Run until `cancel` fires or the run stops itself.
    ///
    /// # Errors
    ///
    /// Returns an error if startup fails, credentials are permanently
    /// rejected, the realtime reconnect budget runs out, or the log monitor
    /// fails.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        let run_cancel = cancel.child_token();
        let _stop_workers = run_cancel.clone().drop_guard();

        tracing::info!(
            log_dir = ?self.opts.log_dir,
            log_file = ?self.opts.log_file,
            "Uploader app starting"
        );
        validate_log_directory(self.opts.log_dir.as_deref(), self.opts.log_file.as_deref())?;

        let runtime = Arc::new(Runtime::new(
            self.client.clone(),
            Arc::clone(&self.status),
            run_cancel.clone(),
        ));

        let session = match cancellable(&run_cancel, self.client.fetch_session()).await {
            Ok(session) => session,
            Err(err) if err.is_unauthorized() => {
                self.status.apply(ConnectionEvent::AuthFailed);
                return Err(AppError::AuthenticationFailed(err));
            }
            Err(err) => return Err(AppError::StartupConnect(err)),
        };
        self.status.apply(ConnectionEvent::Authenticated);
        runtime.session.set_token(&session.token);

        let channels = cancellable(&run_cancel, self.client.fetch_channels(&session.token))
            .await
            .map_err(AppError::ChannelFetch)?;
        self.status.apply(ConnectionEvent::ChannelsReceived);
        if channels.is_empty() {
            return Err(AppError::NoChannels);
        }
        tracing::info!(count = channels.len(), "Initial channels loaded");
        self.channels.send_replace(channels.clone());

        let mut monitor = Monitor::new(
            MonitorOptions {
                log_dir: self.opts.log_dir.clone(),
                log_file: self.opts.log_file.clone(),
                channels: channels.clone(),
                ..self.settings.monitor.clone()
            },
            ReportForwarder {
                runtime: Arc::clone(&runtime),
            },
        );
        monitor.prepare().await?;

        let stream = StreamClient::new(self.client.clone())
            .with_refresh_lead(self.settings.refresh_lead)
            .with_extra_topics(self.settings.extra_topics.clone());
        let sync = ChannelSync::new(self.client.clone())
            .with_policy(self.settings.reconnect.clone())
            .with_stream(stream);
        let observer: Arc<dyn SyncObserver> = runtime.clone();
        let (config_updates, sync_task) =
            sync.start(&channels, observer, Some(session), run_cancel.clone());

        let (monitor_tx, monitor_rx) = watch::channel(channels);
        let forward_task = tokio::spawn(forward_channel_updates(
            config_updates,
            monitor_tx,
            Arc::clone(&self.channels),
            run_cancel.clone(),
        ));

        tokio::select! {
            () = runtime.connected.notified() => {}
            () = run_cancel.cancelled() => {
                tracing::debug!("Stopping startup handshake wait: cancelled");
                return match runtime.stop.take_reason() {
                    Some(reason) => Err(reason),
                    None => {
                        self.status.apply(ConnectionEvent::Stopped);
                        Ok(())
                    }
                };
            }
            () = tokio::time::sleep(self.settings.handshake_timeout) => {
                tracing::debug!(
                    timeout_secs = self.settings.handshake_timeout.as_secs(),
                    "Startup handshake wait expired"
                );
                return Err(AppError::HandshakeTimeout);
            }
        }

        let heartbeat_task = tokio::spawn(
            Arc::clone(&runtime).heartbeat_loop(self.settings.heartbeat_interval),
        );

        let monitor_result = monitor.run(&run_cancel, Some(monitor_rx)).await;

        run_cancel.cancel();
        for task in [sync_task, forward_task, heartbeat_task] {
            if let Err(e) = task.await {
                tracing::debug!(error = %e, "Worker task ended abnormally");
            }
        }

        self.status.apply(ConnectionEvent::Stopped);
        if let Some(reason) = runtime.stop.take_reason() {
            if runtime.stop.is_auth_shutdown() {
                tracing::warn!(
                    error = %reason,
                    "Uploader app stopped due to authentication failure"
                );
            } else {
                tracing::warn!(error = %reason, "Uploader app stopped after reconnect exhaustion");
            }
            return Err(reason);
        }
        if let Err(err) = monitor_result {
            tracing::warn!(error = %err, "Uploader app stopped with error");
            return Err(err.into());
        }
        tracing::info!("Uploader app stopped");
        Ok(())
    }
}

/// The log location must be an accessible directory.
fn validate_log_directory(log_dir: Option<&Path>, log_file: Option<&Path>) -> Result<(), AppError> {
    let dir: Option<PathBuf> = match (log_dir, log_file) {
        (Some(dir), _) => Some(dir.to_path_buf()),
        (None, Some(file)) => file.parent().map(|p| {
            if p.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                p.to_path_buf()
            }
        }),
        (None, None) => None,
    };
    let dir = dir.ok_or_else(|| AppError::LogDirectory("log directory is required".to_string()))?;

    let metadata = std::fs::metadata(&dir)
        .map_err(|e| AppError::LogDirectory(format!("log directory is not accessible: {e}")))?;
    if !metadata.is_dir() {
        return Err(AppError::LogDirectory("log path is not a directory".to_string()));
    }
    Ok(())
}

/// Copy channel lists from the sync worker to the monitor and to app
/// subscribers. Closing the monitor side ends the monitor's update stream.
async fn forward_channel_updates(
    mut source: watch::Receiver<Vec<Channel>>,
    target: watch::Sender<Vec<Channel>>,
    published: Arc<watch::Sender<Vec<Channel>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Channel update forwarder stopped: cancelled");
                return;
            }
            changed = source.changed() => {
                if changed.is_err() {
                    tracing::debug!("Channel update forwarder stopped: source closed");
                    return;
                }
                let channels = source.borrow_and_update().clone();
                tracing::debug!(count = channels.len(), "Forwarding channel update");
                published.send_replace(channels.clone());
                if target.send(channels).is_err() {
                    tracing::debug!("Channel update forwarder stopped: monitor gone");
                    return;
                }
            }
        }
    }
}

/// State shared by the workers of one run.
#[derive(Debug)]
struct Runtime {
    client: UploaderClient,
    status: Arc<StatusTracker>,
    session: SessionState,
    stop: StopState,
    /// Unix seconds of the last successful API call; 0 if none.
    last_api_success: AtomicI64,
    connected: Notify,
    cancel: CancellationToken,
}

impl Runtime {
    fn new(client: UploaderClient, status: Arc<StatusTracker>, cancel: CancellationToken) -> Self {
        Self {
            client,
            status,
            session: SessionState::new(),
            stop: StopState::new(),
            last_api_success: AtomicI64::new(0),
            connected: Notify::new(),
            cancel,
        }
    }

    /// Run an authenticated call, recovering once from an unauthorized
    /// response.
    ///
    /// On 401 the short session is refreshed; if that is also unauthorized a
    /// new session is fetched with the long-lived token. If even that is
    /// rejected the run stops for auth and the original error is returned.
    async fn with_session_retry<T, F, Fut>(&self, call: F) -> Result<T, AppError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let token = self.session.token().ok_or(AppError::SessionUnavailable)?;
        let err = match cancellable(&self.cancel, call(token.clone())).await {
            Ok(value) => {
                self.mark_healthy();
                return Ok(value);
            }
            Err(err) if !err.is_unauthorized() => return Err(AppError::Client(err)),
            Err(err) => err,
        };

        let refreshed = match self.refresh_or_reauth(&token).await {
            Some(session) => session,
            None => return Err(AppError::Client(err)),
        };
        self.session.set_token(&refreshed.token);

        let value = cancellable(&self.cancel, call(refreshed.token))
            .await
            .map_err(AppError::Client)?;
        self.mark_healthy();
        Ok(value)
    }

    async fn refresh_or_reauth(&self, token: &str) -> Option<Session> {
        let refresh = self.client.refresh_session(token);
        let refresh_err = match cancellable(&self.cancel, refresh).await {
            Ok(session) => return Some(session),
            Err(err) => err,
        };
        if !refresh_err.is_unauthorized() {
            tracing::debug!(error = %refresh_err, "Short session refresh failed");
            return None;
        }

        tracing::warn!(
            error = %refresh_err,
            "Short session refresh unauthorized; attempting long-lived re-auth"
        );
        match cancellable(&self.cancel, self.client.fetch_session()).await {
            Ok(session) => Some(session),
            Err(fetch_err) => {
                if fetch_err.is_unauthorized() {
                    self.session.clear_connection();
                    self.status.apply(ConnectionEvent::AuthFailed);
                    self.stop_for_auth(fetch_err);
                } else {
                    tracing::debug!(error = %fetch_err, "Long-lived re-auth failed");
                }
                None
            }
        }
    }

    fn mark_healthy(&self) {
        self.last_api_success
            .store(Utc::now().timestamp(), Ordering::Release);
        if matches!(
            self.status.current(),
            Some(ConnectionStatus::Disconnected | ConnectionStatus::DisconnectedAuth)
        ) {
            return;
        }
        self.status.apply(ConnectionEvent::ApiSuccess);
    }

    fn stop_for_auth(&self, cause: ApiError) {
        if !self.stop.latch_auth_shutdown() {
            return;
        }
        tracing::warn!(error = %cause, "Stopping uploader due to authentication failure");
        self.status.apply(ConnectionEvent::AuthFailed);
        self.stop.set_reason(AppError::AuthenticationFailed(cause));
        self.cancel.cancel();
    }

    async fn heartbeat_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.session.token().is_none() {
                continue;
            }

            let client = &self.client;
            let result = self
                .with_session_retry(|token| async move { client.heartbeat(&token).await })
                .await;
            if let Err(err) = result {
                if self.cancel.is_cancelled() {
                    return;
                }
                tracing::warn!(error = %err, "Heartbeat failed");
            }
        }
    }
}

impl SyncObserver for Runtime {
    fn on_connected(&self, topic: &str, session: &Session, epoch: u64) {
        self.session.set_connected_session(&session.token);
        tracing::info!(
            epoch,
            topic,
            expires_at = session.expires_at,
            refresh_after_seconds = session.refresh_after_seconds,
            "Realtime epoch connected"
        );
        self.status.apply(ConnectionEvent::RealtimeConnected { epoch });
        self.connected.notify_one();
    }

    fn on_disconnected(&self, err: &ApiError, epoch: u64) {
        self.session.clear_connection();
        tracing::warn!(epoch, error = %err, "Realtime epoch disconnected");
        if self.cancel.is_cancelled() {
            return;
        }
        if err.is_unauthorized() {
            self.status.apply(ConnectionEvent::AuthFailed);
        } else {
            self.status.apply(ConnectionEvent::RealtimeDisconnected { epoch });
        }
    }

    fn on_stopped(&self, err: ApiError) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::warn!(error = %err, "Realtime channel sync retries exhausted");
        self.status.apply(ConnectionEvent::ReconnectExhausted);
        self.stop.set_reason(AppError::ReconnectExhausted(err));
        self.cancel.cancel();
    }

    fn on_auth_failure(&self, err: ApiError) {
        self.stop_for_auth(err);
    }

    fn should_continue_after_exhausted(&self, last_err: &ApiError, max_elapsed: Duration) -> bool {
        let last_success = self.last_api_success.load(Ordering::Acquire);
        if last_success <= 0 {
            return false;
        }
        let since = Utc::now().timestamp().saturating_sub(last_success);
        let since = Duration::from_secs(u64::try_from(since).unwrap_or(0));
        if since > max_elapsed {
            return false;
        }
        tracing::debug!(
            error = %last_err,
            last_api_success_ago_secs = since.as_secs(),
            "Recent API success keeps realtime reconnects alive"
        );
        true
    }
}

/// Submits monitor reports through the session retry policy.
#[derive(Debug)]
struct ReportForwarder {
    runtime: Arc<Runtime>,
}

impl MonitorObserver for ReportForwarder {
    async fn on_report(&mut self, report: &ReportEvent) -> Result<(), ReportError> {
        let payload = SubmitPayload {
            text: report.line.clone(),
            channel_id: report.channel.id.clone(),
        };
        let client = &self.runtime.client;
        let payload = &payload;
        self.runtime
            .with_session_retry(|token| async move { client.submit(&token, payload).await })
            .await?;
        Ok(())
    }

    fn on_error(&mut self, err: &WatcherError) {
        tracing::warn!(error = %err, "Log monitor callback error");
    }

    fn on_tracked(&mut self, selection: &LogSelection) {
        tracing::debug!(
            path = %selection.path.display(),
            channel_id = %selection.channel.id,
            "Log file tracked"
        );
    }

    fn on_untracked(&mut self, path: &Path) {
        tracing::debug!(path = %path.display(), "Log file untracked");
    }
}
