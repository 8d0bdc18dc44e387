//! Reconnect backoff.

use std::time::{Duration, Instant};

/// Exponential reconnect schedule with an elapsed-time budget.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Total time a run of failures may take before the budget is spent.
    pub max_elapsed: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(5 * 60),
        }
    }
}

/// Backoff state for one supervisor.
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
    window_start: Instant,
}

impl Backoff {
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            current: policy.initial_interval,
            policy,
            window_start: Instant::now(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Next delay, or `None` once the elapsed-time budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.next_delay_at(Instant::now())
    }

    fn next_delay_at(&mut self, now: Instant) -> Option<Duration> {
        let delay = self.current;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed + delay > self.policy.max_elapsed {
            return None;
        }

        let next = self.current.mul_f64(self.policy.multiplier.max(1.0));
        self.current = next.min(self.policy.max_interval);
        Some(delay)
    }

    /// Restart from the initial interval with a fresh budget.
    pub fn reset(&mut self) {
        self.current = self.policy.initial_interval;
        self.window_start = Instant::now();
    }

    /// Grant a fresh elapsed-time budget, keeping the current interval.
    pub fn extend_window(&mut self) {
        self.window_start = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_and_ceiling() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let now = backoff.window_start;
        let delays: Vec<u64> = (0..5)
            .map(|_| backoff.next_delay_at(now).unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 30, 30]);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let now = backoff.window_start;
        backoff.next_delay_at(now);
        backoff.next_delay_at(now);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_budget_exhausted() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let start = backoff.window_start;
        assert!(backoff.next_delay_at(start + Duration::from_secs(290)).is_some());
        assert!(backoff.next_delay_at(start + Duration::from_secs(299)).is_none());
    }

    #[test]
    fn test_extend_window_keeps_interval() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let start = backoff.window_start;
        for _ in 0..4 {
            backoff.next_delay_at(start);
        }
        assert!(backoff.next_delay_at(start + Duration::from_secs(600)).is_none());

        backoff.extend_window();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(30)));
    }
}
