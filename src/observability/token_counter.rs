use crate::protocol::canonical::{ContentItem, Message, ProviderKind, Usage};
use std::time::Duration;
use tracing::info;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimate the output tokens of an aggregated assistant message.
///
/// Counts text, thought text and tool call arguments; images are not counted.
#[must_use]
pub fn estimate_message_tokens(message: &Message) -> u64 {
    let mut total: u64 = 0;
    for item in &message.content {
        match item {
            ContentItem::Text(text) => total += estimate_tokens(text),
            ContentItem::Thought(thought) => total += estimate_tokens(&thought.text),
            ContentItem::Json(value) => total += estimate_tokens(&value.to_string()),
            ContentItem::ImageUrl(_) | ContentItem::CacheHint => {}
        }
    }
    for call in &message.tool_calls {
        total += estimate_tokens(&call.name);
        total += estimate_tokens(&call.arguments);
    }
    total
}

/// Fill a zero output counter from a local estimate of `message`.
///
/// Upstream non-zero values always win.
#[must_use]
pub fn usage_with_estimate(upstream: &Usage, message: &Message) -> Usage {
    let mut usage = *upstream;
    if usage.output_tokens == 0 {
        usage.output_tokens = estimate_message_tokens(message);
    }
    usage
}

/// Log token usage for a completed stream at INFO level.
pub fn log_stream_usage(provider: ProviderKind, usage: &Usage, duration: Duration) {
    info!(
        provider = %provider,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        cached_input_tokens = usage.cached_input_tokens,
        reasoning_tokens = usage.reasoning_tokens,
        total_tokens = usage.total_tokens(),
        duration_seconds = duration.as_secs_f64(),
        "stream completed"
    );
}
