//! Chat log monitor.
//!
//! Tracks the newest log per channel and character, tails them, and turns
//! new report lines into [`ReportEvent`]s. Filesystem events, a rescan tick
//! and channel-list updates are handled on one loop.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use notify_debouncer_full::notify::event::ModifyKind;
use notify_debouncer_full::notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::discovery::{
    find_logs, is_path_newer, parse_log_file_meta, resolve_channel_for_path, LogSelection,
};
use super::error::{ReportError, WatcherError};
use super::health::{HealthTracker, DEFAULT_STALE_AFTER};
use super::report::{normalize_log_line, parse_report_line};
use super::tailer::Tailer;
use crate::api::{truncate, Channel};

const FS_DEBOUNCE: Duration = Duration::from_millis(100);

/// A report line ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEvent {
    /// Normalized log line.
    pub line: String,
    pub channel: Channel,
    pub source_path: PathBuf,
    pub character_id: String,
    /// Time stamped on the line.
    pub timestamp: DateTime<Utc>,
}

/// Receives monitor output.
pub trait MonitorObserver: Send {
    /// Handle a report. A failed report is not recorded for dedup, so a
    /// later trigger can retry it.
    fn on_report(
        &mut self,
        report: &ReportEvent,
    ) -> impl Future<Output = Result<(), ReportError>> + Send;

    fn on_error(&mut self, err: &WatcherError);

    fn on_tracked(&mut self, selection: &LogSelection);

    fn on_untracked(&mut self, path: &Path);
}

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub log_dir: Option<PathBuf>,
    /// Track only this file instead of discovering logs in a directory.
    pub log_file: Option<PathBuf>,
    pub channels: Vec<Channel>,
    pub rescan_period: Duration,
    pub dedup_window: Duration,
    /// How far back existing lines are replayed when a file is first tracked.
    pub initial_lookback: Duration,
    pub stale_after: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_file: None,
            channels: Vec::new(),
            rescan_period: Duration::from_secs(5),
            dedup_window: Duration::from_secs(15),
            initial_lookback: Duration::from_secs(60),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

#[derive(Debug)]
struct TrackedLog {
    selection: LogSelection,
    tailer: Tailer,
}

/// Log monitor.
#[derive(Debug)]
pub struct Monitor<O> {
    opts: MonitorOptions,
    observer: O,
    channels: Vec<Channel>,
    log_dir: Option<PathBuf>,
    log_file: Option<PathBuf>,
    watch_dir: Option<PathBuf>,
    prepared: bool,
    tracked: BTreeMap<PathBuf, TrackedLog>,
    recent: HashMap<(String, String), Instant>,
    health: HealthTracker,
}

impl<O: MonitorObserver> Monitor<O> {
    #[must_use]
    pub fn new(opts: MonitorOptions, observer: O) -> Self {
        Self {
            channels: opts.channels.clone(),
            opts,
            observer,
            log_dir: None,
            log_file: None,
            watch_dir: None,
            prepared: false,
            tracked: BTreeMap::new(),
            recent: HashMap::new(),
            health: HealthTracker::new(),
        }
    }

    #[must_use]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Paths currently tracked, in order.
    #[must_use]
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        self.tracked.keys().cloned().collect()
    }

    /// Resolve paths, track initial logs and replay recent lines.
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if no log location is configured, the log directory
    /// cannot be read, or the log file maps to no channel.
    pub async fn prepare(&mut self) -> Result<(), WatcherError> {
        if self.prepared {
            return Ok(());
        }

        let canonical = |p: &PathBuf| std::fs::canonicalize(p).unwrap_or_else(|_| p.clone());
        self.log_dir = self.opts.log_dir.as_ref().map(canonical);
        self.log_file = self.opts.log_file.as_ref().map(canonical);
        let watch_dir = self
            .log_dir
            .clone()
            .or_else(|| {
                self.log_file
                    .as_deref()
                    .and_then(Path::parent)
                    .map(Path::to_path_buf)
            })
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or(WatcherError::MissingLogDir)?;
        self.watch_dir = Some(watch_dir.clone());

        self.sync_tracked_logs().await?;
        self.report_health();
        if self.tracked.is_empty() {
            tracing::warn!("No matching log files found for configured channels");
        }

        tracing::info!(
            directory = %watch_dir.display(),
            files = self.tracked.len(),
            channels = self.channels.len(),
            "Watching logs"
        );
        self.prepared = true;
        Ok(())
    }

    /// Run until cancelled.
    ///
    /// `updates` delivers replacement channel lists; a closed sender is
    /// tolerated.
    ///
    /// # Errors
    ///
    /// Returns an error if preparation fails or the filesystem watcher cannot
    /// be started.
    pub async fn run(
        &mut self,
        cancel: &CancellationToken,
        mut updates: Option<watch::Receiver<Vec<Channel>>>,
    ) -> Result<(), WatcherError> {
        tracing::debug!(
            configured_channels = self.channels.len(),
            log_dir = ?self.opts.log_dir,
            log_file = ?self.opts.log_file,
            "Starting log monitor"
        );
        self.prepare().await?;
        let watch_dir = self.watch_dir.clone().ok_or(WatcherError::MissingLogDir)?;

        let (fs_tx, mut fs_rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(FS_DEBOUNCE, None, move |result: DebounceEventResult| {
            let _ = fs_tx.send(result);
        })?;
        debouncer.watch(&watch_dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(directory = %watch_dir.display(), "Watching directory");

        let period = self.opts.rescan_period;
        let mut rescan = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Stopping log monitor: cancelled");
                    return Ok(());
                }
                update = next_update(&mut updates) => match update {
                    Some(channels) => self.handle_channel_update(channels).await,
                    None => {
                        tracing::debug!("Channel update stream closed");
                        updates = None;
                    }
                },
                Some(result) = fs_rx.recv() => match result {
                    Ok(events) => {
                        for event in events {
                            self.handle_fs_event(event.kind, &event.paths).await;
                        }
                    }
                    Err(errors) => {
                        for err in errors {
                            self.handle_watcher_error(WatcherError::Notify(err));
                        }
                    }
                },
                _ = rescan.tick() => self.poll_tick().await,
            }
        }
    }

    /// Replace the channel list and resync.
    pub async fn handle_channel_update(&mut self, channels: Vec<Channel>) {
        tracing::info!(count = channels.len(), "Received channel update");
        self.channels = channels;
        if let Err(err) = self.sync_tracked_logs().await {
            tracing::warn!(error = %err, "Failed to sync logs after channel update");
        }
        self.report_health();
    }

    /// Resync, read every tracked file, refresh health and prune dedup state.
    pub async fn poll_tick(&mut self) {
        tracing::debug!(tracked = self.tracked.len(), "Poll tick: syncing tracked logs");
        if let Err(err) = self.sync_tracked_logs().await {
            tracing::debug!(error = %err, "Log sync failed");
        }
        for path in self.tracked_paths() {
            self.read_and_process(&path).await;
        }
        self.report_health();
        self.prune_recent(Instant::now());
    }

    /// React to one filesystem notification.
    pub async fn handle_fs_event(&mut self, kind: EventKind, paths: &[PathBuf]) {
        let (track, untrack) = match kind {
            EventKind::Create(_) => (true, false),
            EventKind::Modify(ModifyKind::Name(_)) => (true, true),
            EventKind::Modify(_) => (true, false),
            EventKind::Remove(_) => (false, true),
            _ => (false, false),
        };

        for path in paths {
            tracing::trace!(?kind, path = %path.display(), "Filesystem event");
            if track {
                self.maybe_track_event_path(path).await;
            }
            if untrack {
                self.maybe_untrack_path(path);
            }
            if track && self.tracked.contains_key(path) {
                self.read_and_process(path).await;
            }
        }
    }

    fn handle_watcher_error(&mut self, err: WatcherError) {
        tracing::warn!(error = %err, "Watcher error");
        self.observer.on_error(&err);
    }

    fn desired_selections(&self) -> Result<Vec<LogSelection>, WatcherError> {
        if let Some(file) = &self.log_file {
            let channel = resolve_channel_for_path(file, &self.channels)
                .ok_or_else(|| WatcherError::UnmappedLogFile(file.clone()))?;
            return Ok(vec![LogSelection {
                path: file.clone(),
                channel,
            }]);
        }

        let dir = self.log_dir.as_ref().ok_or(WatcherError::MissingLogDir)?;
        find_logs(dir, &self.channels)
    }

    async fn sync_tracked_logs(&mut self) -> Result<(), WatcherError> {
        let desired = self.desired_selections()?;
        tracing::debug!(count = desired.len(), "Computed desired log selections");

        let mut added = Vec::new();
        for selection in &desired {
            match self.tracked.get_mut(&selection.path) {
                Some(tracked) => tracked.selection.channel = selection.channel.clone(),
                None => added.push(selection.clone()),
            }
        }

        let removed: Vec<PathBuf> = self
            .tracked
            .keys()
            .filter(|path| !desired.iter().any(|s| &s.path == *path))
            .cloned()
            .collect();
        for path in removed {
            tracing::info!(path = %path.display(), "Stopped tracking log file");
            self.untrack(&path);
        }

        for selection in added {
            self.start_tracking(selection).await;
        }
        Ok(())
    }

    /// Track a file, replay its recent lines, then move it to end of file.
    async fn start_tracking(&mut self, selection: LogSelection) {
        tracing::info!(
            path = %selection.path.display(),
            channel = %selection.channel.name,
            channel_id = %selection.channel.id,
            "Tracking log file"
        );
        self.observer.on_tracked(&selection);

        let path = selection.path.clone();
        self.tracked.insert(
            path.clone(),
            TrackedLog {
                tailer: Tailer::new(path.clone()),
                selection,
            },
        );

        let cutoff = Utc::now() - self.opts.initial_lookback;
        if let Err(err) = self.catch_up(&path, cutoff).await {
            tracing::warn!(path = %path.display(), error = %err, "Failed to read recent logs");
        }
        if let Some(tracked) = self.tracked.get_mut(&path) {
            if let Err(err) = tracked.tailer.prime().await {
                tracing::warn!(path = %path.display(), error = %err, "Failed to prime log tailer");
            }
        }
    }

    async fn catch_up(&mut self, path: &Path, cutoff: DateTime<Utc>) -> Result<(), WatcherError> {
        let Some(tracked) = self.tracked.get_mut(path) else {
            return Ok(());
        };
        let lines = tracked.tailer.read_new_lines().await?;
        let selection = tracked.selection.clone();

        let scanned = lines.len();
        let submitted = self.process_lines(lines, &selection, Some(cutoff)).await;
        tracing::debug!(
            scanned,
            submitted,
            file = %path.display(),
            "Existing scan complete"
        );
        Ok(())
    }

    fn untrack(&mut self, path: &Path) {
        if self.tracked.remove(path).is_some() {
            self.observer.on_untracked(path);
        }
    }

    async fn maybe_track_event_path(&mut self, path: &Path) {
        // a single configured file is never swapped for another
        if self.log_file.is_some() || self.tracked.contains_key(path) {
            return;
        }
        let Some(channel) = resolve_channel_for_path(path, &self.channels) else {
            return;
        };
        let Some(meta) = parse_log_file_meta(path) else {
            return;
        };
        if !std::fs::metadata(path).is_ok_and(|m| m.is_file()) {
            return;
        }

        if let Some(existing) = self.find_tracked_for(&channel.id, &meta.character_id) {
            if !is_path_newer(path, &existing) {
                return;
            }
            tracing::info!(
                from = %existing.display(),
                to = %path.display(),
                channel_id = %channel.id,
                character_id = %meta.character_id,
                "Switching tracked log file"
            );
            self.untrack(&existing);
        }

        self.start_tracking(LogSelection {
            path: path.to_path_buf(),
            channel,
        })
        .await;
    }

    fn find_tracked_for(&self, channel_id: &str, character_id: &str) -> Option<PathBuf> {
        let channel_id = channel_id.trim();
        let character_id = character_id.trim();
        if channel_id.is_empty() || character_id.is_empty() {
            return None;
        }
        self.tracked.iter().find_map(|(path, tracked)| {
            let meta = parse_log_file_meta(path)?;
            (tracked.selection.channel.id.trim() == channel_id
                && meta.character_id.trim() == character_id)
                .then(|| path.clone())
        })
    }

    fn maybe_untrack_path(&mut self, path: &Path) {
        if !self.tracked.contains_key(path) || path.exists() {
            return;
        }
        tracing::info!(path = %path.display(), "Stopped tracking removed log file");
        self.untrack(path);
    }

    async fn read_and_process(&mut self, path: &Path) {
        let Some(tracked) = self.tracked.get_mut(path) else {
            return;
        };
        let lines = match tracked.tailer.read_new_lines().await {
            Ok(lines) => lines,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "Failed to read new lines");
                return;
            }
        };
        let selection = tracked.selection.clone();
        self.process_lines(lines, &selection, None).await;
    }

    /// Run lines through the report pipeline. Returns how many were emitted.
    async fn process_lines(
        &mut self,
        lines: Vec<String>,
        selection: &LogSelection,
        cutoff: Option<DateTime<Utc>>,
    ) -> usize {
        if lines.is_empty() {
            return 0;
        }
        tracing::debug!(count = lines.len(), path = %selection.path.display(), "Read new lines");

        let mut emitted = 0;
        for raw in &lines {
            let line = normalize_log_line(raw);
            let Some(report) = parse_report_line(line) else {
                tracing::trace!(line = %truncate(line), "Skipping non-report line");
                continue;
            };
            if report.should_ignore() {
                tracing::debug!(
                    author = %report.author,
                    message = %truncate(&report.message),
                    "Skipping report line due to filtered author/message"
                );
                continue;
            }
            if cutoff.is_some_and(|cutoff| report.time < cutoff) {
                continue;
            }
            if self.is_recent_duplicate(&selection.channel.id, line, Instant::now()) {
                tracing::debug!("Skipping local duplicate line");
                continue;
            }

            if let Err(err) = self.emit_report(selection, line, report.time).await {
                tracing::warn!(error = %err, "Failed to emit report line");
                continue;
            }
            tracing::debug!(
                channel = %selection.channel.name,
                channel_id = %selection.channel.id,
                report_time = report.time.timestamp(),
                "Report accepted"
            );
            emitted += 1;
        }
        emitted
    }

    async fn emit_report(
        &mut self,
        selection: &LogSelection,
        line: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), WatcherError> {
        let character_id = parse_log_file_meta(&selection.path)
            .map(|meta| meta.character_id)
            .unwrap_or_default();
        let event = ReportEvent {
            line: line.to_string(),
            channel: selection.channel.clone(),
            source_path: selection.path.clone(),
            character_id,
            timestamp,
        };

        if let Err(err) = self.observer.on_report(&event).await {
            let err = WatcherError::Report(err);
            self.observer.on_error(&err);
            return Err(err);
        }
        self.mark_recent(&selection.channel.id, line, Instant::now());
        Ok(())
    }

    fn is_recent_duplicate(&self, channel_id: &str, line: &str, now: Instant) -> bool {
        if channel_id.is_empty() || line.is_empty() {
            return false;
        }
        self.recent
            .get(&(channel_id.to_string(), line.to_string()))
            .is_some_and(|seen| now.saturating_duration_since(*seen) <= self.opts.dedup_window)
    }

    fn mark_recent(&mut self, channel_id: &str, line: &str, now: Instant) {
        if channel_id.is_empty() || line.is_empty() {
            return;
        }
        self.recent
            .insert((channel_id.to_string(), line.to_string()), now);
    }

    fn prune_recent(&mut self, now: Instant) {
        let window = self.opts.dedup_window;
        self.recent
            .retain(|_, seen| now.saturating_duration_since(*seen) <= window);
    }

    fn report_health(&mut self) {
        let mut latest: HashMap<String, SystemTime> = HashMap::new();
        for tracked in self.tracked.values() {
            let id = tracked.selection.channel.id.trim();
            if id.is_empty() {
                continue;
            }
            let Ok(modified) = std::fs::metadata(&tracked.selection.path).and_then(|m| m.modified())
            else {
                continue;
            };
            latest
                .entry(id.to_string())
                .and_modify(|prev| *prev = (*prev).max(modified))
                .or_insert(modified);
        }
        self.health
            .update(&self.channels, &latest, SystemTime::now(), self.opts.stale_after);
    }
}

async fn next_update(updates: &mut Option<watch::Receiver<Vec<Channel>>>) -> Option<Vec<Channel>> {
    match updates {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}
