//! End-to-end tests for the uploader app against a mock server.

mod common;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use common::{eventually, MockServer, MockState};
use sentinel_uploader::api::Channel;
use sentinel_uploader::app::{AppError, RunSettings, UploaderApp};
use sentinel_uploader::config::Options;
use sentinel_uploader::logs::MonitorOptions;
use sentinel_uploader::status::{ConnectionStatus, StatusObserver};

#[derive(Default)]
struct StatusLog(Mutex<Vec<ConnectionStatus>>);

impl StatusLog {
    fn seen(&self) -> Vec<ConnectionStatus> {
        self.0.lock().unwrap().clone()
    }
}

impl StatusObserver for StatusLog {
    fn on_status_change(&self, status: ConnectionStatus) {
        self.0.lock().unwrap().push(status);
    }
}

fn fast_settings() -> RunSettings {
    RunSettings {
        heartbeat_interval: Duration::from_secs(3600),
        handshake_timeout: Duration::from_secs(5),
        monitor: MonitorOptions {
            rescan_period: Duration::from_millis(100),
            ..MonitorOptions::default()
        },
        ..RunSettings::default()
    }
}

fn log_dir_with_intel_log() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let dir = std::fs::canonicalize(temp_dir.path()).expect("canonical temp dir");
    let path = dir.join("Intel_20260101_120000_90000001.txt");
    std::fs::write(&path, "  Channel ID:      intel\n").expect("Failed to write log");
    (temp_dir, path)
}

fn app_for(
    server: &MockServer,
    log_dir: &Path,
    settings: RunSettings,
) -> (UploaderApp, Arc<StatusLog>) {
    let opts = Options {
        base_url: server.base_url.clone(),
        token: common::UPLOADER_TOKEN.to_string(),
        log_dir: Some(log_dir.to_path_buf()),
        ..Options::default()
    };
    let statuses = Arc::new(StatusLog::default());
    let app = UploaderApp::new(opts, server.client())
        .with_settings(settings)
        .with_status_observer(statuses.clone());
    (app, statuses)
}

fn two_channels() -> MockState {
    MockState::with_channels(json!([
        {"id": "c1", "name": "Intel"},
        {"id": "c2", "name": "Delve"},
    ]))
}

async fn wait_for_status(app: &UploaderApp, wanted: ConnectionStatus) {
    let mut rx = app.subscribe_status();
    timeout(Duration::from_secs(5), rx.wait_for(|s| *s == Some(wanted)))
        .await
        .expect("status not reached in time")
        .expect("status channel closed");
}

#[tokio::test]
async fn test_clean_startup_reaches_connected() {
    let server = MockServer::start(two_channels()).await;
    let (_temp_dir, log) = log_dir_with_intel_log();
    let (app, statuses) = app_for(&server, log.parent().unwrap(), fast_settings());
    let cancel = CancellationToken::new();

    let (result, ()) = tokio::join!(app.run(&cancel), async {
        wait_for_status(&app, ConnectionStatus::Connected).await;

        let subscriptions = server.state.subscriptions();
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].0, "session-1");
        assert_eq!(
            subscriptions[0].1,
            json!({"clientId": "client-1", "subscriptions": ["uploader.config"]})
        );
        assert_eq!(
            *app.subscribe_channels().borrow(),
            vec![Channel::new("c2", "Delve"), Channel::new("c1", "Intel")]
        );
        cancel.cancel();
    });

    result.expect("run should stop cleanly on cancel");
    assert_eq!(
        statuses.seen(),
        vec![
            ConnectionStatus::Authenticated,
            ConnectionStatus::ChannelsReceived,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
        ]
    );
}

#[tokio::test]
async fn test_new_report_line_is_submitted() {
    let server = MockServer::start(two_channels()).await;
    let (_temp_dir, log) = log_dir_with_intel_log();
    let (app, _statuses) = app_for(&server, log.parent().unwrap(), fast_settings());
    let cancel = CancellationToken::new();

    let line = format!(
        "[ {} ] Scout Pilot > Jita  red x3",
        chrono::Utc::now().format("%Y.%m.%d %H:%M:%S")
    );
    let (result, ()) = tokio::join!(app.run(&cancel), async {
        wait_for_status(&app, ConnectionStatus::Connected).await;

        let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(file, "{line}").unwrap();
        writeln!(file, "[ 2026.01.01 12:00:01 ] EVE System > Channel MOTD").unwrap();

        let state = &server.state;
        assert!(eventually(Duration::from_secs(5), || !state.submissions().is_empty()).await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    result.expect("run should stop cleanly on cancel");
    let submissions = server.state.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, "session-1");
    assert_eq!(submissions[0].1, json!({"text": line, "channel_id": "c1"}));
}

#[tokio::test]
async fn test_unauthorized_heartbeat_recovers_via_refresh() {
    let state = two_channels();
    state.reject_token("session-1");
    let server = MockServer::start(state).await;
    let (_temp_dir, log) = log_dir_with_intel_log();
    let settings = RunSettings {
        heartbeat_interval: Duration::from_millis(100),
        ..fast_settings()
    };
    let (app, statuses) = app_for(&server, log.parent().unwrap(), settings);
    let cancel = CancellationToken::new();

    let (result, ()) = tokio::join!(app.run(&cancel), async {
        wait_for_status(&app, ConnectionStatus::Connected).await;
        let state = &server.state;
        assert!(eventually(Duration::from_secs(5), || !state.heartbeat_tokens().is_empty()).await);
        cancel.cancel();
    });

    result.expect("run should stop cleanly on cancel");
    assert_eq!(server.state.heartbeat_tokens()[0], "refreshed-1");
    assert!(server.state.refreshes.load(Ordering::SeqCst) >= 1);
    assert!(!statuses.seen().contains(&ConnectionStatus::DisconnectedAuth));
}

#[tokio::test]
async fn test_rejected_reauth_stops_with_auth_failure() {
    let state = two_channels();
    state.reject_token("session-1");
    state.reject_refresh.store(true, Ordering::SeqCst);
    let server = MockServer::start(state).await;
    let (_temp_dir, log) = log_dir_with_intel_log();
    let settings = RunSettings {
        heartbeat_interval: Duration::from_millis(100),
        ..fast_settings()
    };
    let (app, statuses) = app_for(&server, log.parent().unwrap(), settings);
    let cancel = CancellationToken::new();

    let run = async {
        tokio::join!(app.run(&cancel), async {
            wait_for_status(&app, ConnectionStatus::Connected).await;
            server.state.reject_long_lived.store(true, Ordering::SeqCst);
        })
    };
    let (result, ()) = timeout(Duration::from_secs(10), run)
        .await
        .expect("run should stop on auth failure");

    assert!(matches!(result, Err(AppError::AuthenticationFailed(_))));
    assert_eq!(app.status(), Some(ConnectionStatus::DisconnectedAuth));
    assert_eq!(statuses.seen().last(), Some(&ConnectionStatus::DisconnectedAuth));
    assert!(server.state.heartbeat_tokens().is_empty());
}

#[tokio::test]
async fn test_realtime_config_update_reaches_subscribers() {
    let state = MockState::with_channels(json!([{"id": "c1", "name": "Intel"}]));
    let update = r#"{"channels":[{"id":"c1","name":"Intel"},{"id":"c2","name":"Delve"}]}"#;
    state.config_events.lock().unwrap().push(update.to_string());
    let server = MockServer::start(state).await;
    let (_temp_dir, log) = log_dir_with_intel_log();
    let (app, _statuses) = app_for(&server, log.parent().unwrap(), fast_settings());
    let cancel = CancellationToken::new();

    let (result, ()) = tokio::join!(app.run(&cancel), async {
        let mut channels = app.subscribe_channels();
        timeout(Duration::from_secs(5), channels.wait_for(|list| list.len() == 2))
            .await
            .expect("channel update not forwarded")
            .expect("channel watch closed");
        assert_eq!(
            *channels.borrow(),
            vec![Channel::new("c2", "Delve"), Channel::new("c1", "Intel")]
        );
        cancel.cancel();
    });
    result.expect("run should stop cleanly on cancel");
}

#[tokio::test]
async fn test_startup_rejects_bad_token() {
    let state = two_channels();
    state.reject_long_lived.store(true, Ordering::SeqCst);
    let server = MockServer::start(state).await;
    let (_temp_dir, log) = log_dir_with_intel_log();
    let (app, _statuses) = app_for(&server, log.parent().unwrap(), fast_settings());

    let result = app.run(&CancellationToken::new()).await;
    assert!(matches!(result, Err(AppError::AuthenticationFailed(_))));
    assert_eq!(app.status(), Some(ConnectionStatus::DisconnectedAuth));
}

#[tokio::test]
async fn test_startup_fails_without_channels() {
    let server = MockServer::start(MockState::with_channels(json!([]))).await;
    let (_temp_dir, log) = log_dir_with_intel_log();
    let (app, _statuses) = app_for(&server, log.parent().unwrap(), fast_settings());

    let result = app.run(&CancellationToken::new()).await;
    assert!(matches!(result, Err(AppError::NoChannels)));
}

#[tokio::test]
async fn test_startup_fails_on_missing_log_dir() {
    let server = MockServer::start(two_channels()).await;
    let temp_dir = TempDir::new().unwrap();
    let (app, _statuses) = app_for(&server, &temp_dir.path().join("missing"), fast_settings());

    let result = app.run(&CancellationToken::new()).await;
    assert!(matches!(result, Err(AppError::LogDirectory(_))));
    assert_eq!(server.state.sessions_issued.load(Ordering::SeqCst), 0);
}
