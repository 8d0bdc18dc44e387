//! Chat log discovery.
//!
//! Log files are named `<channel>_<YYYYMMDD>_<HHMMSS>_<characterId>.txt`.
//! Discovery maps them onto configured channels and picks the newest file
//! per channel and character.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, Utc};

use super::error::WatcherError;
use crate::api::Channel;

/// Fields parsed from a log file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileMeta {
    pub channel_name: String,
    pub character_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A log file chosen to represent a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSelection {
    pub path: PathBuf,
    pub channel: Channel,
}

#[derive(Debug)]
struct LogMatch {
    selection: LogSelection,
    meta: LogFileMeta,
    modified: SystemTime,
}

impl LogMatch {
    /// Same ordering as [`is_path_newer`]: timestamp, then mtime, then path.
    fn newer_than(&self, other: &Self) -> bool {
        (self.meta.timestamp, self.modified, &self.selection.path)
            > (other.meta.timestamp, other.modified, &other.selection.path)
    }
}

/// Parse a log file name into its channel, character and timestamp.
///
/// Channel names may themselves contain underscores.
///
/// ```
/// use std::path::Path;
/// use sentinel_uploader::logs::parse_log_file_meta;
///
/// let meta = parse_log_file_meta(Path::new("Fleet_Intel_20260102_030405_9001.txt")).unwrap();
/// assert_eq!(meta.channel_name, "Fleet_Intel");
/// assert_eq!(meta.character_id, "9001");
/// ```
#[must_use]
pub fn parse_log_file_meta(path: &Path) -> Option<LogFileMeta> {
    let extension = path.extension()?.to_str()?;
    if !extension.eq_ignore_ascii_case("txt") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;

    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 {
        return None;
    }
    let n = parts.len();
    let channel_name = parts[..n - 3].join("_").trim().to_string();
    let date = parts[n - 3].trim();
    let time = parts[n - 2].trim();
    let character_id = parts[n - 1].trim();

    if channel_name.is_empty() || character_id.is_empty() || date.len() != 8 || time.len() != 6 {
        return None;
    }
    if !date.bytes().chain(time.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let timestamp = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y%m%d %H%M%S")
        .ok()?
        .and_utc();

    Some(LogFileMeta {
        channel_name,
        character_id: character_id.to_string(),
        timestamp,
    })
}

fn channel_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Index channels by normalized name. The first channel per name wins.
fn channel_index(channels: &[Channel]) -> HashMap<String, &Channel> {
    let mut index = HashMap::with_capacity(channels.len());
    for channel in channels {
        let key = channel_key(&channel.name);
        if key.is_empty() {
            continue;
        }
        index.entry(key).or_insert(channel);
    }
    index
}

fn lookup(index: &HashMap<String, &Channel>, meta: &LogFileMeta) -> Option<Channel> {
    let channel = index.get(&channel_key(&meta.channel_name))?;
    if channel.id.trim().is_empty() {
        return None;
    }
    Some((*channel).clone())
}

/// Resolve the configured channel a log file belongs to.
#[must_use]
pub fn resolve_channel_for_path(path: &Path, channels: &[Channel]) -> Option<Channel> {
    let meta = parse_log_file_meta(path)?;
    lookup(&channel_index(channels), &meta)
}

fn find_log_matches(dir: &Path, channels: &[Channel]) -> Result<Vec<LogMatch>, WatcherError> {
    let index = channel_index(channels);

    let mut matches: Vec<LogMatch> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if metadata.is_dir() {
                return None;
            }
            let path = entry.path();
            let meta = parse_log_file_meta(&path)?;
            let channel = lookup(&index, &meta)?;
            Some(LogMatch {
                selection: LogSelection { path, channel },
                meta,
                modified: metadata.modified().ok()?,
            })
        })
        .collect();

    matches.sort_by(by_timestamp_then_path);
    Ok(matches)
}

fn by_timestamp_then_path(a: &LogMatch, b: &LogMatch) -> Ordering {
    a.meta
        .timestamp
        .cmp(&b.meta.timestamp)
        .then_with(|| a.selection.path.cmp(&b.selection.path))
}

/// Newest log per `(channel id, character id)`, sorted by timestamp then path.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn find_logs(dir: &Path, channels: &[Channel]) -> Result<Vec<LogSelection>, WatcherError> {
    let mut latest: HashMap<(String, String), LogMatch> = HashMap::new();
    for candidate in find_log_matches(dir, channels)? {
        let key = (
            candidate.selection.channel.id.clone(),
            candidate.meta.character_id.clone(),
        );
        match latest.get(&key) {
            Some(current) if !candidate.newer_than(current) => {}
            _ => {
                latest.insert(key, candidate);
            }
        }
    }

    let mut latest: Vec<LogMatch> = latest.into_values().collect();
    latest.sort_by(by_timestamp_then_path);
    Ok(latest.into_iter().map(|m| m.selection).collect())
}

/// The single newest matching log in `dir`.
#[must_use]
pub fn find_latest_log(dir: &Path, channels: &[Channel]) -> Option<LogSelection> {
    let matches = find_log_matches(dir, channels).ok()?;
    let mut iter = matches.into_iter();
    let first = iter.next()?;
    let latest = iter.fold(first, |latest, m| if m.newer_than(&latest) { m } else { latest });
    Some(latest.selection)
}

/// Whether `candidate` should replace `existing` as the log for an identity.
///
/// Compares parsed timestamps, then modification times, then paths.
#[must_use]
pub fn is_path_newer(candidate: &Path, existing: &Path) -> bool {
    if let (Some(c), Some(e)) = (parse_log_file_meta(candidate), parse_log_file_meta(existing)) {
        match c.timestamp.cmp(&e.timestamp) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
    }

    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    if let (Some(c), Some(e)) = (modified(candidate), modified(existing)) {
        match c.cmp(&e) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
    }

    candidate > existing
}
