//! Incremental decoding of OpenAI-style Server-Sent Events.
//!
//! [`SseDecoder`] is the synchronous core: it accepts raw body chunks split
//! at arbitrary byte offsets and yields the content deltas they complete.
//! [`stream_chat`] drives it over a backend's byte stream.

use crate::client::ChatBackend;
use crate::error::ClientError;
use crate::protocol::{ChatCompletionChunk, ChatMessage, StreamResponse};
use async_stream::stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::{error, warn};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Push notification for stream failures, invoked in addition to the
/// terminal error element.
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    // Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    // Text after the last newline seen.
    buffer: String,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds one body chunk and returns the events it completes.
    ///
    /// After [`SseEvent::Done`] is returned, remaining lines in the chunk and
    /// every later chunk are ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        if self.finished {
            return Vec::new();
        }

        let text = self.decode_utf8(chunk);
        let previous_len = self.buffer.len();
        self.buffer.push_str(&text);

        let Some(offset) = text.rfind('\n') else {
            return Vec::new();
        };
        let last_newline = previous_len + offset;
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        let mut events = Vec::new();
        for line in complete.split('\n') {
            match parse_line(line) {
                Some(SseEvent::Done) => {
                    self.finished = true;
                    self.buffer.clear();
                    events.push(SseEvent::Done);
                    break;
                }
                Some(event) => events.push(event),
                None => {}
            }
        }
        events
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        let joined: Vec<u8>;
        let mut bytes = if self.pending.is_empty() {
            chunk
        } else {
            self.pending.extend_from_slice(chunk);
            joined = std::mem::take(&mut self.pending);
            joined.as_slice()
        };

        let mut text = String::new();
        loop {
            match std::str::from_utf8(bytes) {
                Ok(valid) => {
                    text.push_str(valid);
                    return text;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        // Incomplete sequence at the end; wait for the next chunk.
                        None => {
                            self.pending = rest.to_vec();
                            return text;
                        }
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[invalid..];
                        }
                    }
                }
            }
        }
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let line = line.trim_end_matches('\r');
    let data = line.strip_prefix(DATA_PREFIX)?;

    if data == DONE_SENTINEL {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => chunk
            .into_content()
            .filter(|content| !content.is_empty())
            .map(SseEvent::Delta),
        Err(err) => {
            warn!(error = %err, data, "failed to parse SSE data");
            None
        }
    }
}

/// Streams a chat completion as content deltas followed by exactly one
/// terminal element.
///
/// Failures never escape as errors: they end the sequence with a terminal
/// element carrying `error` and are also reported to `on_error`.
pub fn stream_chat<B>(
    backend: Arc<B>,
    messages: Vec<ChatMessage>,
    on_error: Option<ErrorCallback>,
) -> BoxStream<'static, StreamResponse>
where
    B: ChatBackend + ?Sized + 'static,
{
    let fail = move |message: String| {
        if let Some(callback) = &on_error {
            callback(&message);
        }
        StreamResponse::failed(message)
    };

    stream! {
        if backend.config().token.is_empty() {
            yield fail(ClientError::MissingToken.to_string());
            return;
        }

        let mut body = match backend.open_stream(&messages).await {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, "failed to open completion stream");
                yield fail(err.to_string());
                return;
            }
        };

        let mut decoder = SseDecoder::new();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    error!(error = %err, "completion stream interrupted");
                    yield fail(err.to_string());
                    return;
                }
            };

            for event in decoder.feed(&chunk) {
                match event {
                    SseEvent::Delta(content) => {
                        yield StreamResponse::delta(content);
                    }
                    SseEvent::Done => {
                        yield StreamResponse::complete();
                        return;
                    }
                }
            }
        }

        yield StreamResponse::complete();
    }
    .boxed()
}
