//! Chat log discovery, tailing and monitoring.

mod discovery;
mod error;
mod health;
mod monitor;
mod report;
mod tailer;

pub use discovery::{
    find_latest_log, find_logs, is_path_newer, parse_log_file_meta, resolve_channel_for_path,
    LogFileMeta, LogSelection,
};
pub use error::{ReportError, WatcherError};
pub use health::{ChannelHealth, HealthTracker, DEFAULT_STALE_AFTER};
pub use monitor::{Monitor, MonitorObserver, MonitorOptions, ReportEvent};
pub use report::{normalize_log_line, parse_report_line, ParsedReport, SYSTEM_AUTHOR};
pub use tailer::{Encoding, Tailer};
