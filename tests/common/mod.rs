#![allow(dead_code)]

use bytes::Bytes;
use futures_util::Stream;
use polystream::{ProviderStream, StreamDecoder, StreamError, StreamStatus};

/// Response body delivering `chunks` one at a time.
pub fn body(chunks: Vec<String>) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + 'static {
    futures_util::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
}

/// `data:` frames for each JSON value, then an optional `[DONE]`.
pub fn data_frames(values: &[serde_json::Value], done: bool) -> Vec<String> {
    let mut frames: Vec<String> = values.iter().map(|v| format!("data: {v}\n\n")).collect();
    if done {
        frames.push("data: [DONE]\n\n".to_string());
    }
    frames
}

/// `event:` + `data:` frames, named after each value's `type`.
pub fn named_frames(values: &[serde_json::Value]) -> Vec<String> {
    values
        .iter()
        .map(|v| {
            let name = v.get("type").and_then(|t| t.as_str()).unwrap_or("message");
            format!("event: {name}\ndata: {v}\n\n")
        })
        .collect()
}

/// Pull every status, recording the tool-call delta for each.
pub async fn drive<D: StreamDecoder>(stream: &mut ProviderStream<D>) -> Vec<(StreamStatus, String)> {
    let mut seen = Vec::new();
    while let Some(status) = stream.next().await {
        seen.push((status, stream.tool_call_delta().to_string()));
    }
    seen
}

pub fn statuses(seen: &[(StreamStatus, String)]) -> Vec<StreamStatus> {
    seen.iter().map(|(s, _)| *s).collect()
}

pub fn count(seen: &[(StreamStatus, String)], status: StreamStatus) -> usize {
    seen.iter().filter(|(s, _)| *s == status).count()
}
