/// SSE framing for both sides of the bridge.
///
/// The backend side is parsed incrementally from a byte stream; the client
/// side is encoded from typed [`StreamEvent`]s.
use bytes::Bytes;
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

use crate::protocol::messages::StreamEvent;

/// One parsed SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::take(&mut self.events[self.head]);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<SseEvent>) {
        self.events.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// SseParser
// ---------------------------------------------------------------------------

/// Incremental SSE line parser.
///
/// Chunks may split lines anywhere. `data:` lines of one frame are joined
/// with `\n`; a blank line dispatches the frame; comment lines and unknown
/// fields are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    frame: FrameBuilder,
}

#[derive(Debug, Default)]
struct FrameBuilder {
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and return any complete events parsed.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &self.buffer[processed_up_to..line_end];
            self.frame
                .process_line(line.strip_suffix('\r').unwrap_or(line), out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// End of input: process an unterminated last line and dispatch a frame
    /// that never saw its blank line.
    pub fn finish(&mut self, out: &mut Vec<SseEvent>) {
        if self.read_offset < self.buffer.len() {
            let line = &self.buffer[self.read_offset..];
            self.frame
                .process_line(line.strip_suffix('\r').unwrap_or(line), out);
        }
        self.buffer.clear();
        self.read_offset = 0;
        self.frame.process_line("", out);
    }
}

impl FrameBuilder {
    fn process_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if self.has_data {
                events.push(SseEvent {
                    event: self.event_type.take(),
                    data: std::mem::take(&mut self.data_buffer),
                    id: self.last_event_id.clone(),
                });
                self.has_data = false;
            } else {
                self.event_type = None;
            }
            return;
        }

        // Comment
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.data_buffer.push('\n');
                } else {
                    self.has_data = true;
                }
                self.data_buffer.push_str(value);
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.last_event_id = Some(value.to_string()),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Format a named SSE frame.
#[must_use]
pub fn named_sse_frame(event_type: &str, json: &str) -> String {
    let mut out = String::with_capacity(18 + event_type.len() + json.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// Encode a client stream event as `event: <type>\ndata: <json>\n\n`.
#[must_use]
pub fn encode_stream_event(event: &StreamEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => named_sse_frame(event.event_type(), &json),
        Err(err) => {
            tracing::error!("failed to serialize {} event: {}", event.event_type(), err);
            String::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Decode as much of `remainder` as is valid UTF-8 into the parser, keeping
/// an incomplete trailing sequence for the next chunk.
fn feed_utf8(parser: &mut SseParser, remainder: &mut Vec<u8>, parsed: &mut Vec<SseEvent>) {
    let (valid_up_to, truncated) = match std::str::from_utf8(remainder) {
        Ok(text) => {
            parser.feed_into(text, parsed);
            remainder.clear();
            return;
        }
        Err(e) => (e.valid_up_to(), e.error_len().is_none()),
    };
    if truncated {
        if let Ok(text) = std::str::from_utf8(&remainder[..valid_up_to]) {
            parser.feed_into(text, parsed);
        }
        remainder.drain(..valid_up_to);
    } else {
        tracing::warn!(
            offset = valid_up_to,
            "replacing invalid UTF-8 in backend stream"
        );
        let lossy = String::from_utf8_lossy(remainder).into_owned();
        parser.feed_into(&lossy, parsed);
        remainder.clear();
    }
}

/// Split a byte stream into SSE events using [`SseParser`].
///
/// Multi-byte characters split across chunks are reassembled. Transport
/// errors end the stream; whatever was complete before them is yielded, and
/// a trailing frame without its blank line is dispatched at the end.
pub fn sse_frame_stream<S, E>(byte_stream: S) -> impl Stream<Item = SseEvent> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            SseParser::new(),
            Vec::<u8>::new(),
            Vec::<SseEvent>::with_capacity(8),
            PendingEvents::new(),
            false,
        ),
        |(mut stream, mut parser, mut remainder, mut parsed, mut pending, mut done)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((event, (stream, parser, remainder, parsed, pending, done)));
                }
                if done {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        remainder.extend_from_slice(&bytes);
                        feed_utf8(&mut parser, &mut remainder, &mut parsed);
                    }
                    Some(Err(err)) => {
                        tracing::warn!("backend stream error: {}", err);
                        parser.finish(&mut parsed);
                        done = true;
                    }
                    None => {
                        parser.finish(&mut parsed);
                        done = true;
                    }
                }
                pending.extend_from_vec(&mut parsed);
            }
        },
    )
}
