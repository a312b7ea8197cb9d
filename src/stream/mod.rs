pub mod sse;
pub mod state;

pub use sse::{SseParser, SseReader};
pub use state::StreamState;

use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::observability::log_stream_complete;
use crate::observability::token_counter::usage_with_estimate;
use crate::protocol::canonical::{ImagePart, Message, ProviderKind, StreamStatus, Thought, ToolCall, Usage};
use state::Payload;

/// A parsed SSE frame from the upstream.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Response body as a boxed byte stream with errors already mapped.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

pub(crate) fn boxed_body<S, E>(body: S) -> ByteStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<StreamError> + 'static,
{
    Box::pin(body.map(|chunk| chunk.map_err(Into::into)))
}

/// What the driver should do after an event was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFlow {
    Continue,
    /// The provider sent its terminal marker; nothing after it is decoded.
    Done,
}

/// One provider's event vocabulary.
///
/// Decoders are synchronous: they turn one SSE event into calls on the
/// shared [`StreamState`]. Reading and cancellation belong to
/// [`ProviderStream`].
pub trait StreamDecoder: Send {
    const PROVIDER: ProviderKind;

    /// Decode one event.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::MalformedEvent`] for payloads that are not
    /// valid JSON and [`StreamError::Provider`] for explicit error events.
    fn decode(&mut self, event: &SseEvent, state: &mut StreamState) -> Result<DecodeFlow, StreamError>;

    /// Called once when the body is exhausted or the terminal marker arrived.
    fn finish(&mut self, state: &mut StreamState) {
        state.close_open_tool_calls();
        state.finish_open_thoughts();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Finished,
    Closed,
}

/// Pull-based stream of normalized statuses over one provider response.
///
/// Each call to [`next`](Self::next) yields one [`StreamStatus`]; the
/// accessors then describe the value attached to that status, and
/// [`message`](Self::message) holds everything aggregated so far.
pub struct ProviderStream<D: StreamDecoder> {
    reader: SseReader,
    decoder: D,
    state: StreamState,
    current: Payload,
    cancel: CancellationToken,
    drain_max_bytes: usize,
    phase: Phase,
    error: Option<StreamError>,
    started_at: Instant,
}

impl<D: StreamDecoder> ProviderStream<D> {
    /// Wrap a response body using the default [`StreamConfig`].
    pub fn new<S, E>(body: S, decoder: D) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<StreamError> + 'static,
    {
        Self::with_config(body, decoder, &StreamConfig::default())
    }

    pub fn with_config<S, E>(body: S, decoder: D, config: &StreamConfig) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<StreamError> + 'static,
    {
        Self {
            reader: SseReader::new(boxed_body(body), D::PROVIDER, config.max_event_bytes),
            decoder,
            state: StreamState::new(D::PROVIDER),
            current: Payload::None,
            cancel: CancellationToken::new(),
            drain_max_bytes: config.drain_max_bytes,
            phase: Phase::Streaming,
            error: None,
            started_at: Instant::now(),
        }
    }

    /// Stop iterating once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        D::PROVIDER
    }

    /// Pull the next status. Returns `None` when the stream is exhausted,
    /// failed or was cancelled; check [`err`](Self::err) to tell them apart.
    pub async fn next(&mut self) -> Option<StreamStatus> {
        loop {
            if self.phase == Phase::Closed {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.fail(StreamError::Cancelled);
                return None;
            }
            if let Some(emission) = self.state.pop_emission() {
                self.current = emission.payload;
                return Some(emission.status);
            }
            if self.phase == Phase::Finished {
                self.phase = Phase::Closed;
                let usage = usage_with_estimate(self.state.usage(), self.state.message());
                log_stream_complete(D::PROVIDER, &usage, self.started_at);
                return None;
            }

            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                read = self.reader.next_event() => Some(read),
            };
            let Some(read) = read else {
                self.fail(StreamError::Cancelled);
                return None;
            };

            match read {
                Some(Ok(event)) => {
                    let provider = D::PROVIDER;
                    tracing::trace!(%provider, event = ?event.event, "decoding event");
                    match self.decoder.decode(&event, &mut self.state) {
                        Ok(DecodeFlow::Continue) => {}
                        Ok(DecodeFlow::Done) => {
                            self.decoder.finish(&mut self.state);
                            self.phase = Phase::Finished;
                            self.reader.drain(self.drain_max_bytes).await;
                        }
                        Err(err) => {
                            let drain = matches!(err, StreamError::Provider { .. });
                            self.fail(err);
                            if drain {
                                self.reader.drain(self.drain_max_bytes).await;
                            }
                            return None;
                        }
                    }
                }
                Some(Err(err)) => {
                    self.fail(err);
                    return None;
                }
                None => {
                    self.decoder.finish(&mut self.state);
                    self.phase = Phase::Finished;
                }
            }
        }
    }

    fn fail(&mut self, err: StreamError) {
        let provider = D::PROVIDER;
        match &err {
            StreamError::Cancelled => tracing::debug!(%provider, "stream cancelled"),
            other => tracing::warn!(%provider, error = %other, "stream failed"),
        }
        self.state.discard_pending();
        self.current = Payload::None;
        self.error = Some(err);
        self.phase = Phase::Closed;
    }

    /// Drain what is left of the body (bounded by `drain_max_bytes`) so the
    /// connection can be reused, then drop the stream.
    pub async fn close(mut self) {
        if !self.reader.is_exhausted() && !self.cancel.is_cancelled() {
            self.reader.drain(self.drain_max_bytes).await;
        }
    }

    /// The fatal error that stopped iteration, if any.
    #[must_use]
    pub fn err(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    /// Everything aggregated so far.
    #[must_use]
    pub fn message(&self) -> &Message {
        self.state.message()
    }

    /// Take the aggregated message, or the error that ended the stream.
    ///
    /// # Errors
    ///
    /// Returns the stream's fatal error when iteration did not complete.
    pub fn into_message(self) -> Result<Message, StreamError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.state.into_message()),
        }
    }

    #[must_use]
    pub fn usage(&self) -> &Usage {
        self.state.usage()
    }

    /// Text fragment attached to the last `Text` status.
    #[must_use]
    pub fn text(&self) -> &str {
        match &self.current {
            Payload::Text(text) => text,
            _ => "",
        }
    }

    /// Thought fragment (for `Thinking`) or the complete thought (for
    /// `ThinkingDone`).
    #[must_use]
    pub fn thought(&self) -> Option<&Thought> {
        match &self.current {
            Payload::Thought(thought) => Some(thought),
            _ => None,
        }
    }

    /// Tool call the last tool call status refers to. Its `arguments` hold
    /// every fragment decoded so far.
    #[must_use]
    pub fn tool_call(&self) -> Option<&ToolCall> {
        match &self.current {
            Payload::ToolCall { index, .. } => self.state.message().tool_calls.get(*index),
            _ => None,
        }
    }

    /// Argument bytes added by the last `ToolCallDelta`.
    #[must_use]
    pub fn tool_call_delta(&self) -> &str {
        match &self.current {
            Payload::ToolCall { delta, .. } => delta,
            _ => "",
        }
    }

    #[must_use]
    pub fn image(&self) -> Option<&ImagePart> {
        match &self.current {
            Payload::Image(image) => Some(image),
            _ => None,
        }
    }
}

impl<D: StreamDecoder + Default> ProviderStream<D> {
    /// Wrap a response body with a fresh decoder.
    pub fn from_body<S, E>(body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<StreamError> + 'static,
    {
        Self::new(body, D::default())
    }
}

/// Parse the JSON payload of one event, mapping failures to
/// [`StreamError::MalformedEvent`].
pub(crate) fn parse_event_json<'a, T: serde::Deserialize<'a>>(
    provider: ProviderKind,
    data: &'a str,
) -> Result<T, StreamError> {
    serde_json::from_str(data).map_err(|e| StreamError::malformed(provider, e.to_string()))
}
