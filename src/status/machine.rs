//! Connection status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// User-facing connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Authenticated,
    ChannelsReceived,
    Connected,
    Reconnecting,
    Disconnected,
    DisconnectedAuth,
}

impl ConnectionStatus {
    /// Display label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Authenticated => "Authenticated",
            Self::ChannelsReceived => "Channels received",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::Disconnected => "Disconnected",
            Self::DisconnectedAuth => "Disconnected (auth)",
        }
    }

    /// Lowercase key, stable for matching.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Authenticated => "authenticated",
            Self::ChannelsReceived => "channels received",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::DisconnectedAuth => "disconnected (auth)",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Authenticated,
    ChannelsReceived,
    RealtimeConnected { epoch: u64 },
    RealtimeDisconnected { epoch: u64 },
    ApiSuccess,
    ReconnectExhausted,
    AuthFailed,
    Stopped,
}

impl ConnectionEvent {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Authenticated => "authenticated",
            Self::ChannelsReceived => "channels_received",
            Self::RealtimeConnected { .. } => "realtime_connected",
            Self::RealtimeDisconnected { .. } => "realtime_disconnected",
            Self::ApiSuccess => "api_success",
            Self::ReconnectExhausted => "reconnect_exhausted",
            Self::AuthFailed => "auth_failed",
            Self::Stopped => "stopped",
        }
    }

    #[must_use]
    pub fn epoch(self) -> Option<u64> {
        match self {
            Self::RealtimeConnected { epoch } | Self::RealtimeDisconnected { epoch } => Some(epoch),
            _ => None,
        }
    }
}

/// A status change produced by [`StatusMachine::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<ConnectionStatus>,
    pub to: ConnectionStatus,
}

/// Folds connection events into a status.
///
/// While auth has failed or the app has stopped, only `Authenticated`,
/// `AuthFailed` and `Stopped` are honoured. Realtime events older than the
/// last seen epoch are dropped.
#[derive(Debug, Clone, Default)]
pub struct StatusMachine {
    current: Option<ConnectionStatus>,
    auth_failed: bool,
    stopped: bool,
    realtime_connected: bool,
    realtime_epoch: u64,
}

impl StatusMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> Option<ConnectionStatus> {
        self.current
    }

    /// Apply an event, returning the transition if the status changed.
    pub fn apply(&mut self, event: ConnectionEvent) -> Option<Transition> {
        let next = self.next_status(event)?;
        if self.current == Some(next) {
            return None;
        }
        let from = self.current.replace(next);
        Some(Transition { from, to: next })
    }

    fn next_status(&mut self, event: ConnectionEvent) -> Option<ConnectionStatus> {
        let latched = self.auth_failed || self.stopped;
        match event {
            ConnectionEvent::Authenticated => {
                self.auth_failed = false;
                self.stopped = false;
                self.realtime_connected = false;
                self.realtime_epoch = 0;
                Some(ConnectionStatus::Authenticated)
            }
            ConnectionEvent::AuthFailed => {
                self.auth_failed = true;
                self.stopped = true;
                self.realtime_connected = false;
                Some(ConnectionStatus::DisconnectedAuth)
            }
            ConnectionEvent::Stopped => {
                self.stopped = true;
                self.realtime_connected = false;
                Some(if self.auth_failed {
                    ConnectionStatus::DisconnectedAuth
                } else {
                    ConnectionStatus::Disconnected
                })
            }
            _ if latched => None,
            ConnectionEvent::ChannelsReceived => Some(if self.realtime_connected {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::ChannelsReceived
            }),
            ConnectionEvent::RealtimeConnected { epoch } => {
                if epoch < self.realtime_epoch {
                    return None;
                }
                self.realtime_epoch = epoch;
                self.realtime_connected = true;
                Some(ConnectionStatus::Connected)
            }
            ConnectionEvent::RealtimeDisconnected { epoch } => {
                if epoch < self.realtime_epoch {
                    return None;
                }
                self.realtime_epoch = epoch;
                self.realtime_connected = false;
                Some(ConnectionStatus::Reconnecting)
            }
            ConnectionEvent::ApiSuccess => Some(ConnectionStatus::Connected),
            ConnectionEvent::ReconnectExhausted => {
                self.realtime_connected = false;
                Some(ConnectionStatus::Disconnected)
            }
        }
    }
}
