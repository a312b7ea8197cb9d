/// SSE (Server-Sent Events) frame parser and body reader.
///
/// Handles the low-level parsing of SSE frames from a byte stream,
/// including buffering partial lines and handling field semantics per the
/// [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html).
use super::{ByteStream, SseEvent};
use crate::error::StreamError;
use crate::protocol::canonical::ProviderKind;
use futures_util::StreamExt;
use memchr::memchr_iter;
use smallvec::SmallVec;

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    #[inline]
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
        if parsed.is_empty() {
            return;
        }
        self.events.extend(parsed.drain(..));
    }
}

/// Raised by [`SseParser`] when a single event outgrows its size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTooLarge {
    pub limit: usize,
}

// ---------------------------------------------------------------------------
// SseParser — incremental SSE line parser
// ---------------------------------------------------------------------------

/// Incremental SSE line parser.
///
/// Feed it raw text chunks (potentially arriving in arbitrary byte
/// boundaries) and it yields fully-assembled [`SseEvent`] frames.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    frame: FrameState,
    max_event_bytes: usize,
}

/// Fields of the frame currently being assembled.
#[derive(Default)]
struct FrameState {
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
    retry: Option<u64>,
}

impl FrameState {
    fn dispatch(&mut self) -> Option<SseEvent> {
        if !self.has_data {
            self.event_type = None;
            return None;
        }
        self.has_data = false;
        Some(SseEvent {
            event: self.event_type.take(),
            data: std::mem::take(&mut self.data_buffer),
            id: self.last_event_id.clone(),
            retry: self.retry.take(),
        })
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if let Some(event) = self.dispatch() {
                events.push(event);
            }
            return;
        }

        // Comment line
        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if self.has_data {
                self.data_buffer.push('\n');
            } else {
                self.has_data = true;
            }
            self.data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.event_type = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.last_event_id = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("retry:") {
            if let Ok(ms) = value.trim().parse::<u64>() {
                self.retry = Some(ms);
            }
        }
        // Unknown field names are ignored
    }
}

impl SseParser {
    #[must_use]
    pub fn new(max_event_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            frame: FrameState::default(),
            max_event_bytes,
        }
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    ///
    /// SSE rules:
    /// - `event:` sets the event type for the next frame
    /// - `data:` appends to the data buffer (one leading space is stripped),
    ///   multiple `data:` lines are joined with `\n`
    /// - an empty line terminates a frame
    /// - `:` starts a comment
    /// - `id:` sets the last event ID, `retry:` the reconnection hint
    ///
    /// # Errors
    ///
    /// Returns [`EventTooLarge`] once the event being assembled (data plus
    /// the unterminated line) exceeds the configured limit.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) -> Result<(), EventTooLarge> {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            if self.frame.data_buffer.len() + line.len() > self.max_event_bytes {
                return Err(EventTooLarge {
                    limit: self.max_event_bytes,
                });
            }
            self.frame.process_line(line, out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
        } else {
            let should_compact = self.read_offset > 0
                && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
            if should_compact {
                self.buffer.drain(..self.read_offset);
                self.read_offset = 0;
            }
        }

        let in_flight = self.frame.data_buffer.len() + (self.buffer.len() - self.read_offset);
        if in_flight > self.max_event_bytes {
            return Err(EventTooLarge {
                limit: self.max_event_bytes,
            });
        }
        Ok(())
    }

    /// Flush at end of input: an unterminated last line is processed and a
    /// frame that never saw its blank line is still dispatched.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let mut out = Vec::new();
        if self.read_offset < self.buffer.len() {
            let rest = &self.buffer[self.read_offset..];
            let line = rest.strip_suffix('\r').unwrap_or(rest);
            self.frame.process_line(line, &mut out);
        }
        self.buffer.clear();
        self.read_offset = 0;
        out.pop().or_else(|| self.frame.dispatch())
    }
}

// ---------------------------------------------------------------------------
// SseReader — byte stream to events, with error propagation
// ---------------------------------------------------------------------------

/// Pulls bytes from a response body and hands out parsed [`SseEvent`]s.
///
/// Unlike a plain event stream, read errors, invalid UTF-8 and oversized
/// events are surfaced as [`StreamError`] rather than ending the stream
/// silently.
pub struct SseReader {
    body: ByteStream,
    provider: ProviderKind,
    parser: SseParser,
    remainder: Vec<u8>,
    parsed: Vec<SseEvent>,
    pending: PendingEvents,
    eof: bool,
}

impl SseReader {
    #[must_use]
    pub fn new(body: ByteStream, provider: ProviderKind, max_event_bytes: usize) -> Self {
        Self {
            body,
            provider,
            parser: SseParser::new(max_event_bytes),
            remainder: Vec::new(),
            parsed: Vec::with_capacity(8),
            pending: PendingEvents::new(),
            eof: false,
        }
    }

    /// Next complete event; `None` once the body is exhausted.
    pub async fn next_event(&mut self) -> Option<Result<SseEvent, StreamError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.eof {
                return None;
            }

            match self.body.next().await {
                Some(Ok(bytes)) => {
                    if let Err(err) = self.feed_bytes(&bytes) {
                        self.eof = true;
                        return Some(Err(err));
                    }
                    self.pending.extend_from_vec(&mut self.parsed);
                }
                Some(Err(err)) => {
                    self.eof = true;
                    return Some(Err(err));
                }
                None => {
                    self.eof = true;
                    if !self.remainder.is_empty() {
                        return Some(Err(StreamError::malformed(
                            self.provider,
                            "stream ended inside a UTF-8 sequence",
                        )));
                    }
                    return self.parser.finish().map(Ok);
                }
            }
        }
    }

    fn feed_bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.remainder.extend_from_slice(bytes);
        let valid_up_to = match std::str::from_utf8(&self.remainder) {
            Ok(_) => self.remainder.len(),
            Err(e) if e.error_len().is_some() => {
                return Err(StreamError::malformed(self.provider, "invalid UTF-8 in event stream"));
            }
            Err(e) => e.valid_up_to(),
        };
        let text = std::str::from_utf8(&self.remainder[..valid_up_to])
            .map_err(|e| StreamError::malformed(self.provider, e.to_string()))?;
        self.parser
            .feed_into(text, &mut self.parsed)
            .map_err(|too_large| {
                StreamError::malformed(
                    self.provider,
                    format!("event exceeds {} bytes", too_large.limit),
                )
            })?;
        self.remainder.drain(..valid_up_to);
        Ok(())
    }

    /// Read and discard up to `budget` bytes of the remaining body so the
    /// underlying connection can be reused. Returns the bytes discarded.
    pub async fn drain(&mut self, budget: usize) -> usize {
        let mut drained = 0usize;
        while !self.eof && drained < budget {
            match self.body.next().await {
                Some(Ok(bytes)) => drained += bytes.len(),
                Some(Err(_)) | None => self.eof = true,
            }
        }
        tracing::trace!(provider = %self.provider, drained, exhausted = self.eof, "drained response body");
        drained
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.eof
    }
}
