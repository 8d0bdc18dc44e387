//! Per-channel log health.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::api::Channel;

/// Default age after which a channel's newest log counts as stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Whether a channel has a recently written log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelHealth {
    Ok,
    Stale,
    Missing,
}

impl ChannelHealth {
    /// Classify from the newest modification time among a channel's logs.
    #[must_use]
    pub fn classify(latest: Option<SystemTime>, now: SystemTime, stale_after: Duration) -> Self {
        match latest {
            None => Self::Missing,
            Some(modified) => {
                let age = now.duration_since(modified).unwrap_or_default();
                if age > stale_after {
                    Self::Stale
                } else {
                    Self::Ok
                }
            }
        }
    }
}

/// Remembers the last reported health per channel id.
#[derive(Debug, Default)]
pub struct HealthTracker {
    states: HashMap<String, ChannelHealth>,
}

impl HealthTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update health for every channel and log transitions.
    ///
    /// `latest_by_id` maps channel id to the newest tracked log mtime.
    /// Returns the channels whose state changed.
    pub fn update(
        &mut self,
        channels: &[Channel],
        latest_by_id: &HashMap<String, SystemTime>,
        now: SystemTime,
        stale_after: Duration,
    ) -> Vec<(Channel, ChannelHealth)> {
        let mut changed = Vec::new();
        for channel in channels {
            let id = channel.id.trim();
            if id.is_empty() {
                continue;
            }
            let next = ChannelHealth::classify(latest_by_id.get(id).copied(), now, stale_after);
            if self.states.get(id) == Some(&next) {
                continue;
            }
            self.states.insert(id.to_string(), next);

            match next {
                ChannelHealth::Missing => {
                    tracing::warn!(
                        channel = %channel.name,
                        channel_id = %channel.id,
                        "Channel log not found"
                    );
                }
                ChannelHealth::Stale => {
                    tracing::info!(
                        channel = %channel.name,
                        channel_id = %channel.id,
                        "Channel log is stale"
                    );
                }
                ChannelHealth::Ok => {}
            }
            changed.push((channel.clone(), next));
        }
        changed
    }

    #[must_use]
    pub fn get(&self, channel_id: &str) -> Option<ChannelHealth> {
        self.states.get(channel_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let now = SystemTime::now();
        let stale = DEFAULT_STALE_AFTER;
        assert_eq!(ChannelHealth::classify(None, now, stale), ChannelHealth::Missing);
        assert_eq!(
            ChannelHealth::classify(Some(now - Duration::from_secs(60)), now, stale),
            ChannelHealth::Ok
        );
        assert_eq!(
            ChannelHealth::classify(Some(now - Duration::from_secs(601)), now, stale),
            ChannelHealth::Stale
        );
        // future mtimes count as fresh
        assert_eq!(
            ChannelHealth::classify(Some(now + Duration::from_secs(5)), now, stale),
            ChannelHealth::Ok
        );
    }

    #[test]
    fn test_tracker_reports_changes_once() {
        let channels = vec![Channel::new("c1", "Intel"), Channel::new("", "NoId")];
        let now = SystemTime::now();
        let mut tracker = HealthTracker::new();

        let latest = HashMap::new();
        let changed = tracker.update(&channels, &latest, now, DEFAULT_STALE_AFTER);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].1, ChannelHealth::Missing);
        assert!(tracker.update(&channels, &latest, now, DEFAULT_STALE_AFTER).is_empty());

        let latest = HashMap::from([("c1".to_string(), now)]);
        let changed = tracker.update(&channels, &latest, now, DEFAULT_STALE_AFTER);
        assert_eq!(changed, vec![(Channel::new("c1", "Intel"), ChannelHealth::Ok)]);
        assert_eq!(tracker.get("c1"), Some(ChannelHealth::Ok));
    }
}
