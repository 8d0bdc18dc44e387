//! Shared status holder.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use super::machine::{ConnectionEvent, ConnectionStatus, StatusMachine};

/// Receives status changes.
pub trait StatusObserver: Send + Sync {
    fn on_status_change(&self, status: ConnectionStatus);
}

/// Logs every status change at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusObserver;

impl StatusObserver for LogStatusObserver {
    fn on_status_change(&self, status: ConnectionStatus) {
        tracing::info!(status = %status, "Connection status changed");
    }
}

/// Thread-safe wrapper around [`StatusMachine`].
///
/// Changes go to the observer and to every [`watch`] subscriber.
pub struct StatusTracker {
    machine: Mutex<StatusMachine>,
    observer: Arc<dyn StatusObserver>,
    tx: watch::Sender<Option<ConnectionStatus>>,
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

impl StatusTracker {
    #[must_use]
    pub fn new(observer: Arc<dyn StatusObserver>) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            machine: Mutex::new(StatusMachine::new()),
            observer,
            tx,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<ConnectionStatus> {
        self.machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current()
    }

    /// Watch the status; the initial value is the current status.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<ConnectionStatus>> {
        self.tx.subscribe()
    }

    /// Apply an event. Returns true if the status changed.
    pub fn apply(&self, event: ConnectionEvent) -> bool {
        let transition = {
            let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
            let transition = machine.apply(event);
            if let Some(t) = transition {
                self.tx.send_replace(Some(t.to));
            }
            transition
        };

        let Some(transition) = transition else {
            return false;
        };
        tracing::debug!(
            event = event.name(),
            realtime_epoch = event.epoch().unwrap_or_default(),
            from = transition.from.map_or("", ConnectionStatus::label),
            to = transition.to.label(),
            "Runtime status transition"
        );
        self.observer.on_status_change(transition.to);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ConnectionStatus>>);

    impl StatusObserver for Collect {
        fn on_status_change(&self, status: ConnectionStatus) {
            self.0.lock().unwrap().push(status);
        }
    }

    #[test]
    fn test_tracker_publishes_changes_only() {
        let observer = Arc::new(Collect::default());
        let tracker = StatusTracker::new(observer.clone());
        let rx = tracker.subscribe();

        assert!(tracker.apply(ConnectionEvent::Authenticated));
        assert!(tracker.apply(ConnectionEvent::ApiSuccess));
        assert!(!tracker.apply(ConnectionEvent::ApiSuccess));
        assert!(tracker.apply(ConnectionEvent::RealtimeDisconnected { epoch: 2 }));
        assert!(!tracker.apply(ConnectionEvent::RealtimeConnected { epoch: 1 }));

        assert_eq!(
            *observer.0.lock().unwrap(),
            vec![
                ConnectionStatus::Authenticated,
                ConnectionStatus::Connected,
                ConnectionStatus::Reconnecting,
            ]
        );
        assert_eq!(*rx.borrow(), Some(ConnectionStatus::Reconnecting));
        assert_eq!(tracker.current(), Some(ConnectionStatus::Reconnecting));
    }
}
