//! Log monitor error types.

use std::path::{Path, PathBuf};

/// Error returned by a report handler.
pub type ReportError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while discovering or tailing chat logs.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    /// Neither a log directory nor a log file was configured.
    #[error("Missing log directory")]
    MissingLogDir,

    /// The configured log file does not belong to any configured channel.
    #[error("Failed to map log file to configured channel: {0}")]
    UnmappedLogFile(PathBuf),

    /// Watched file was deleted.
    #[error("Watched file deleted: {0}")]
    FileDeleted(PathBuf),

    /// Permission denied accessing file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Notify watcher error.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The report handler rejected a line.
    #[error("Report handler failed: {0}")]
    Report(ReportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatcherError {
    /// Classify an error from opening `path`.
    #[must_use]
    pub fn from_open(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileDeleted(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_deleted_display() {
        let err = WatcherError::FileDeleted(PathBuf::from("/tmp/Local_20260101_000000_1.txt"));
        assert_eq!(
            err.to_string(),
            "Watched file deleted: /tmp/Local_20260101_000000_1.txt"
        );
    }

    #[test]
    fn test_unmapped_display() {
        let err = WatcherError::UnmappedLogFile(PathBuf::from("/logs/Other_20260101_000000_1.txt"));
        assert_eq!(
            err.to_string(),
            "Failed to map log file to configured channel: /logs/Other_20260101_000000_1.txt"
        );
    }

    #[test]
    fn test_from_open_classifies() {
        let path = Path::new("/tmp/x.txt");
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            WatcherError::from_open(path, not_found),
            WatcherError::FileDeleted(_)
        ));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(
            WatcherError::from_open(path, denied),
            WatcherError::PermissionDenied(_)
        ));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(matches!(WatcherError::from_open(path, other), WatcherError::Io(_)));
    }

    #[test]
    fn test_report_display() {
        let err = WatcherError::Report("submit failed".into());
        assert_eq!(err.to_string(), "Report handler failed: submit failed");
    }

    #[test]
    fn test_from_notify_error() {
        let watcher_err: WatcherError = notify::Error::generic("test error").into();
        assert!(matches!(watcher_err, WatcherError::Notify(_)));
        assert!(watcher_err.to_string().contains("File watcher error"));
    }
}
