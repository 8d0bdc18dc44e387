//! Chat report line grammar.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

/// Author name used by the game client for its own messages.
pub const SYSTEM_AUTHOR: &str = "EVE System";

const TIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

static REPORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[ ([0-9]{4}\.[0-9]{2}\.[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2}) \] ([^>]+) > (.*)$")
        .expect("report pattern is valid")
});

/// A parsed `[ yyyy.mm.dd hh:mm:ss ] Author > Message` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReport {
    pub time: DateTime<Utc>,
    pub author: String,
    pub message: String,
}

impl ParsedReport {
    /// Render back into the log line format.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!(
            "[ {} ] {} > {}",
            self.time.format(TIME_FORMAT),
            self.author,
            self.message
        )
    }

    /// System messages and lines with a blank author or message are not
    /// reports.
    #[must_use]
    pub fn should_ignore(&self) -> bool {
        let author = self.author.trim();
        author.is_empty()
            || self.message.trim().is_empty()
            || author.eq_ignore_ascii_case(SYSTEM_AUTHOR)
    }
}

/// Parse a report line. Author and message are trimmed.
#[must_use]
pub fn parse_report_line(line: &str) -> Option<ParsedReport> {
    let captures = REPORT_PATTERN.captures(line)?;
    let time = NaiveDateTime::parse_from_str(&captures[1], TIME_FORMAT)
        .ok()?
        .and_utc();
    Some(ParsedReport {
        time,
        author: captures[2].trim().to_string(),
        message: captures[3].trim().to_string(),
    })
}

/// Strip a leading BOM and trailing carriage returns.
#[must_use]
pub fn normalize_log_line(line: &str) -> &str {
    line.strip_prefix('\u{feff}')
        .unwrap_or(line)
        .trim_end_matches('\r')
}
