//! Realtime config stream: SSE transport, session runner and reconnect supervisor.

mod backoff;
mod sse;
mod stream;
mod sync;

pub use backoff::{Backoff, ReconnectPolicy};
pub use sse::{into_events, response_chunks, Event, SseParser};
pub use stream::{
    refresh_deadline, SessionHandler, StreamClient, CONNECT_EVENT, DEFAULT_REFRESH_AFTER,
    DEFAULT_REFRESH_LEAD,
};
pub use sync::{ChannelSync, SyncObserver};
