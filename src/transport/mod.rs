//! Opening a decoder over an HTTP response.
//!
//! Building and sending the request is the caller's business; this module
//! starts at the response. Non-2xx responses never reach a decoder: their
//! body is read (bounded) and turned into [`StreamError::Provider`].

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::protocol::error_shapes::parse_error_body;
use crate::stream::{ProviderStream, StreamDecoder};

/// Wrap a `reqwest` response in a [`ProviderStream`].
///
/// # Errors
///
/// Returns [`StreamError::Provider`] for non-2xx statuses (parsed from the
/// error body, falling back to the status line) and
/// [`StreamError::Transport`] when the error body cannot be read.
pub async fn open_stream<D: StreamDecoder>(
    response: reqwest::Response,
    decoder: D,
    config: &StreamConfig,
    cancel: CancellationToken,
) -> Result<ProviderStream<D>, StreamError> {
    let status = response.status();
    stream_from_parts(status, response.bytes_stream(), decoder, config, cancel).await
}

/// Same as [`open_stream`] for any status plus byte-stream pair.
///
/// # Errors
///
/// See [`open_stream`].
pub async fn stream_from_parts<D, S, E>(
    status: http::StatusCode,
    body: S,
    decoder: D,
    config: &StreamConfig,
    cancel: CancellationToken,
) -> Result<ProviderStream<D>, StreamError>
where
    D: StreamDecoder,
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<StreamError> + 'static,
{
    if !status.is_success() {
        let body = read_error_body(std::pin::pin!(body), config.max_event_bytes).await?;
        return Err(parse_error_body(D::PROVIDER, status, &body));
    }
    let provider = D::PROVIDER;
    tracing::debug!(%provider, status = status.as_u16(), "opening provider stream");
    Ok(ProviderStream::with_config(body, decoder, config).with_cancellation(cancel))
}

/// Collect an error body, keeping at most `limit` bytes.
async fn read_error_body<S, E>(mut body: S, limit: usize) -> Result<Bytes, StreamError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<StreamError>,
{
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(Into::into)?;
        let room = limit.saturating_sub(buffer.len());
        buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if buffer.len() >= limit {
            break;
        }
    }
    Ok(buffer.freeze())
}
