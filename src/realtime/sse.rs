//! Server-sent events framing.
//!
//! The parser is fed raw byte chunks and yields complete events. Lines may
//! span chunk boundaries; `\r\n` and `\n` both terminate a line.

use std::collections::VecDeque;

use futures_core::Stream;
use futures_util::StreamExt;

use crate::api::ApiError;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub data: Vec<u8>,
}

impl Event {
    /// Event payload as text.
    #[must_use]
    pub fn data_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Incremental SSE parser.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    name: String,
    data: Vec<u8>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Event> {
        let mut events = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.line.extend_from_slice(&rest[..pos]);
            let line = std::mem::take(&mut self.line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
            rest = &rest[pos + 1..];
        }
        self.line.extend_from_slice(rest);
        events
    }

    /// Flush a trailing partial line and any pending event at end of input.
    pub fn finish(&mut self) -> Option<Event> {
        if !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.emit()
    }

    fn process_line(&mut self, line: &[u8]) -> Option<Event> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            return self.emit();
        }

        if let Some(rest) = line.strip_prefix(b"event:") {
            self.name = String::from_utf8_lossy(rest).trim().to_string();
        } else if let Some(segment) = line.strip_prefix(b"data:") {
            let segment = segment.strip_prefix(b" ").unwrap_or(segment);
            if !self.data.is_empty() {
                self.data.push(b'\n');
            }
            self.data.extend_from_slice(segment);
        }
        None
    }

    fn emit(&mut self) -> Option<Event> {
        if self.name.is_empty() && self.data.is_empty() {
            return None;
        }
        let name = std::mem::take(&mut self.name);
        Some(Event {
            name: name.trim().to_string(),
            data: std::mem::take(&mut self.data),
        })
    }
}

struct EventState<S> {
    chunks: std::pin::Pin<Box<S>>,
    parser: SseParser,
    ready: VecDeque<Event>,
    terminal: Option<ApiError>,
    done: bool,
}

/// Turn a stream of body chunks into a stream of events.
///
/// After the last event, exactly one `Err` is yielded: the read error, or
/// [`ApiError::StreamEnded`] at end of input. The stream then stays
/// exhausted.
pub fn into_events<S>(chunks: S) -> impl Stream<Item = Result<Event, ApiError>>
where
    S: Stream<Item = Result<Vec<u8>, ApiError>>,
{
    let state = EventState {
        chunks: Box::pin(chunks),
        parser: SseParser::new(),
        ready: VecDeque::new(),
        terminal: None,
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if let Some(err) = state.terminal.take() {
                return Some((Err(err), state));
            }
            if state.done {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(bytes)) => {
                    let events = state.parser.feed(&bytes);
                    state.ready.extend(events);
                }
                Some(Err(err)) => {
                    state.ready.extend(state.parser.finish());
                    state.terminal = Some(err);
                    state.done = true;
                }
                None => {
                    state.ready.extend(state.parser.finish());
                    state.terminal = Some(ApiError::StreamEnded);
                    state.done = true;
                }
            }
        }
    })
    .fuse()
}

/// Body chunks of an HTTP response.
pub fn response_chunks(
    response: reqwest::Response,
) -> impl Stream<Item = Result<Vec<u8>, ApiError>> {
    futures_util::stream::unfold(Some(response), |response| async move {
        let mut response = response?;
        match response.chunk().await {
            Ok(Some(bytes)) => Some((Ok(bytes.to_vec()), Some(response))),
            Ok(None) => None,
            Err(e) => Some((Err(ApiError::Transport(e)), None)),
        }
    })
}
