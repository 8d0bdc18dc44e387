//! Connection status tracking.

mod machine;
mod tracker;

pub use machine::{ConnectionEvent, ConnectionStatus, StatusMachine, Transition};
pub use tracker::{LogStatusObserver, StatusObserver, StatusTracker};
