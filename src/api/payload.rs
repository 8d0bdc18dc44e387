//! Helpers for rendering HTTP payloads in log output.

/// Maximum characters of a message kept by [`truncate`].
pub const MAX_LOGGED_CHARS: usize = 160;

/// Normalize an HTTP body for logging.
///
/// JSON is pretty-printed, a JSON-encoded string is unwrapped first, and a
/// blank body renders as `<empty>`.
#[must_use]
pub fn format_payload(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut trimmed = text.trim().to_string();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Ok(serde_json::Value::String(inner)) = serde_json::from_str(&trimmed) {
        trimmed = inner.trim().to_string();
    }

    match serde_json::from_str::<serde_json::Value>(&trimmed) {
        Ok(value @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
            serde_json::to_string_pretty(&value).unwrap_or(trimmed)
        }
        _ => trimmed,
    }
}

/// Shorten a message for log output, appending `...` when cut.
#[must_use]
pub fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_LOGGED_CHARS {
        return message.to_string();
    }
    let mut out: String = message.chars().take(MAX_LOGGED_CHARS).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_empty() {
        assert_eq!(format_payload(b""), "<empty>");
        assert_eq!(format_payload(b"  \n"), "<empty>");
    }

    #[test]
    fn test_format_plain_text() {
        assert_eq!(format_payload(b"bad gateway\n"), "bad gateway");
    }

    #[test]
    fn test_format_json_object() {
        let out = format_payload(br#"{"message":"invalid uploader token"}"#);
        assert!(out.contains("\"message\": \"invalid uploader token\""));
    }

    #[test]
    fn test_format_quoted_json() {
        let out = format_payload(br#""{\"code\":401}""#);
        assert!(out.contains("\"code\": 401"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short"), "short");
        let long = "x".repeat(MAX_LOGGED_CHARS + 10);
        let out = truncate(&long);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), MAX_LOGGED_CHARS + 3);
    }
}
