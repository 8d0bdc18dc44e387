//! Orchestration: startup, session retry policy, heartbeat and report
//! forwarding.

mod error;
mod state;
mod uploader;

pub use error::AppError;
pub use state::{SessionState, StopState};
pub use uploader::{RunSettings, UploaderApp};
