//! API endpoint derivation from a configured origin.

use url::Url;

use super::ConfigError;

/// Fully-qualified URLs for every uploader API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoints {
    /// Canonical API base, `<origin>/api`.
    pub base_url: String,
    pub config_url: String,
    pub submit_url: String,
    pub heartbeat_url: String,
    pub session_refresh_url: String,
    pub realtime_token_url: String,
    pub realtime_url: String,
}

impl ApiEndpoints {
    /// Build endpoints from a user-supplied base URL.
    ///
    /// Any pasted path, query or fragment is dropped and replaced by `/api`,
    /// so both `https://host` and `https://host/api/uploader/config` work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if the URL is not absolute
    /// or its scheme is not http/https.
    pub fn from_base_url(raw: &str) -> Result<Self, ConfigError> {
        let base = api_base_url(raw)?;
        Ok(Self {
            config_url: format!("{base}/uploader/config"),
            submit_url: format!("{base}/uploader/submit"),
            heartbeat_url: format!("{base}/uploader/heartbeat"),
            session_refresh_url: format!("{base}/uploader/session/refresh"),
            realtime_token_url: format!("{base}/uploader/realtime/token"),
            realtime_url: format!("{base}/realtime"),
            base_url: base,
        })
    }
}

fn api_base_url(raw: &str) -> Result<String, ConfigError> {
    let value = raw.trim();
    let invalid = |reason: &str| ConfigError::InvalidBaseUrl {
        url: value.to_string(),
        reason: reason.to_string(),
    };

    let mut parsed = Url::parse(value).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("expected absolute URL like https://example.com"));
    }

    parsed.set_path("/api");
    parsed.set_query(None);
    parsed.set_fragment(None);

    Ok(parsed.as_str().trim_end_matches('/').to_string())
}
