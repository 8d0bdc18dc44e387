//! Channel configuration model.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A logical channel the uploader forwards reports for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

impl Channel {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Body of `GET /uploader/config` and of realtime config messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPayload {
    #[serde(default)]
    pub channels: Vec<Channel>,
}

/// Trim, drop incomplete entries, dedupe and sort a channel list.
///
/// Entries are unique by `(id, lowercase(name))`; the first occurrence wins.
/// The result is sorted by `(name, id)` and normalizing it again is a no-op.
#[must_use]
pub fn normalize_channels(channels: &[Channel]) -> Vec<Channel> {
    let mut seen = HashSet::new();
    let mut normalized: Vec<Channel> = channels
        .iter()
        .filter_map(|channel| {
            let id = channel.id.trim();
            let name = channel.name.trim();
            if id.is_empty() || name.is_empty() {
                return None;
            }
            if !seen.insert((id.to_string(), name.to_lowercase())) {
                return None;
            }
            Some(Channel::new(id, name))
        })
        .collect();

    normalized.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_dedupes_sorts_and_trims() {
        let got = normalize_channels(&[
            Channel::new(" 2 ", " beta "),
            Channel::new("1", "Alpha"),
            Channel::new("1", "alpha"),
            Channel::new("3", "  "),
            Channel::new("", "Gamma"),
            Channel::new("2", "beta"),
        ]);

        assert_eq!(
            got,
            vec![Channel::new("1", "Alpha"), Channel::new("2", "beta")]
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = vec![
            vec![],
            vec![Channel::new("b", "Zulu"), Channel::new("a", "Zulu")],
            vec![
                Channel::new("9", " Intel "),
                Channel::new("9", "INTEL"),
                Channel::new("7", "intel"),
                Channel::new("1", "Delve"),
            ],
        ];

        for input in inputs {
            let once = normalize_channels(&input);
            let twice = normalize_channels(&once);
            assert_eq!(once, twice);

            for pair in once.windows(2) {
                assert!((&pair[0].name, &pair[0].id) <= (&pair[1].name, &pair[1].id));
            }
            let keys: HashSet<_> = once
                .iter()
                .map(|c| (c.id.clone(), c.name.to_lowercase()))
                .collect();
            assert_eq!(keys.len(), once.len());
        }
    }

    #[test]
    fn test_same_name_different_id_kept() {
        let got = normalize_channels(&[Channel::new("b", "Intel"), Channel::new("a", "Intel")]);
        assert_eq!(
            got,
            vec![Channel::new("a", "Intel"), Channel::new("b", "Intel")]
        );
    }

    #[test]
    fn test_config_payload_deserialize() {
        let payload: ConfigPayload =
            serde_json::from_str(r#"{"channels":[{"id":"1","name":"Intel"}]}"#).unwrap();
        assert_eq!(payload.channels, vec![Channel::new("1", "Intel")]);

        let empty: ConfigPayload = serde_json::from_str("{}").unwrap();
        assert!(empty.channels.is_empty());
    }
}
