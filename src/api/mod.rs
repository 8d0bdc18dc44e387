//! Uploader HTTP API: sessions, channel config, heartbeat and submit.

mod channels;
mod client;
mod error;
mod payload;
mod session;
mod transport;

pub use channels::{normalize_channels, Channel, ConfigPayload};
pub use client::{SubmitPayload, UploaderClient};
pub use error::ApiError;
pub use payload::{format_payload, truncate, MAX_LOGGED_CHARS};
pub use session::{build_subscribe_topics, Session, DEFAULT_TOPIC};
pub use transport::{build_http_client, cancellable};
pub(crate) use transport::check_status;
