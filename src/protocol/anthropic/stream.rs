use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::StreamError;
use crate::protocol::canonical::{ProviderKind, Usage};
use crate::protocol::error_shapes::ApiErrorBody;
use crate::stream::{parse_event_json, DecodeFlow, SseEvent, StreamDecoder, StreamState};

use super::{AnthropicContentBlock, AnthropicDelta, AnthropicStreamEvent, AnthropicUsage};

/// What a still-open content block maps to.
#[derive(Debug, Clone)]
enum OpenBlock {
    Text,
    Thinking,
    ToolUse {
        index: usize,
        /// Non-empty `input` from `content_block_start`, used when no
        /// `input_json_delta` follows.
        initial: Option<String>,
    },
    Other,
}

/// Decoder for Anthropic Messages streams.
///
/// Blocks are addressed by their wire `index`. Thinking blocks are
/// anonymous and strictly sequential, so they map onto the latest thought.
#[derive(Debug, Default)]
pub struct AnthropicDecoder {
    blocks: FxHashMap<usize, OpenBlock>,
}

impl AnthropicDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn block_start(&mut self, wire_index: usize, block: &AnthropicContentBlock, state: &mut StreamState) {
        let open = match block {
            AnthropicContentBlock::Text { text, .. } => {
                state.push_text(text);
                OpenBlock::Text
            }
            AnthropicContentBlock::Thinking { thinking, signature } => {
                state.open_thought(None, false);
                state.push_thinking(None, thinking, false);
                if let Some(signature) = signature {
                    state.set_thought_signature(None, signature);
                }
                OpenBlock::Thinking
            }
            AnthropicContentBlock::RedactedThinking { data } => {
                state.open_thought(None, false);
                state.set_thought_signature(None, data);
                OpenBlock::Thinking
            }
            AnthropicContentBlock::ToolUse { id, name, input, .. } => {
                let index = state.begin_tool_call(Some(id), name);
                let initial = match input {
                    serde_json::Value::Object(map) if map.is_empty() => None,
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                };
                OpenBlock::ToolUse { index, initial }
            }
            other => {
                debug!(block = ?other, "ignoring anthropic content block");
                OpenBlock::Other
            }
        };
        self.blocks.insert(wire_index, open);
    }

    fn block_delta(&mut self, wire_index: usize, delta: &AnthropicDelta, state: &mut StreamState) {
        let Some(block) = self.blocks.get(&wire_index) else {
            debug!(index = wire_index, "delta for an unknown content block");
            return;
        };
        match (block, delta) {
            (_, AnthropicDelta::TextDelta { text }) => state.push_text(text),
            (_, AnthropicDelta::ThinkingDelta { thinking }) => state.push_thinking(None, thinking, false),
            (_, AnthropicDelta::SignatureDelta { signature }) => {
                state.set_thought_signature(None, signature);
            }
            (OpenBlock::ToolUse { index, .. }, AnthropicDelta::InputJsonDelta { partial_json }) => {
                state.append_tool_args(*index, partial_json);
            }
            (_, delta) => trace!(?delta, "skipping content block delta"),
        }
    }

    fn block_stop(&mut self, wire_index: usize, state: &mut StreamState) {
        match self.blocks.remove(&wire_index) {
            Some(OpenBlock::ToolUse { index, initial }) => {
                let streamed = state
                    .message()
                    .tool_calls
                    .get(index)
                    .is_some_and(|call| !call.arguments.is_empty());
                if let Some(initial) = initial.filter(|_| !streamed) {
                    state.append_tool_args(index, &initial);
                }
                state.finish_tool_call(index);
            }
            Some(OpenBlock::Thinking) => state.finish_thought(None),
            Some(OpenBlock::Text | OpenBlock::Other) | None => {}
        }
    }
}

fn usage_from_anthropic(usage: &AnthropicUsage) -> Usage {
    Usage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cached_input_tokens: usage.cache_read_input_tokens,
        reasoning_tokens: 0,
    }
}

impl StreamDecoder for AnthropicDecoder {
    const PROVIDER: ProviderKind = ProviderKind::Anthropic;

    fn decode(&mut self, event: &SseEvent, state: &mut StreamState) -> Result<DecodeFlow, StreamError> {
        let parsed: AnthropicStreamEvent = parse_event_json(Self::PROVIDER, &event.data)?;
        match parsed {
            AnthropicStreamEvent::MessageStart { message } => {
                state.start_message();
                state.merge_usage(&usage_from_anthropic(&message.usage));
            }
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => {
                self.block_start(index, &content_block, state);
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => {
                self.block_delta(index, &delta, state);
            }
            AnthropicStreamEvent::ContentBlockStop { index } => self.block_stop(index, state),
            AnthropicStreamEvent::MessageDelta { usage, delta } => {
                if let Some(usage) = usage {
                    state.merge_usage(&usage_from_anthropic(&usage));
                }
                trace!(stop_reason = ?delta.stop_reason, "anthropic message delta");
            }
            AnthropicStreamEvent::MessageStop => return Ok(DecodeFlow::Done),
            AnthropicStreamEvent::Error { error } => {
                let body = ApiErrorBody {
                    message: error.message,
                    kind: Some(error.type_),
                    ..ApiErrorBody::default()
                };
                return Err(body.into_in_stream_error());
            }
            AnthropicStreamEvent::Ping | AnthropicStreamEvent::Unknown => {}
        }
        Ok(DecodeFlow::Continue)
    }

    fn finish(&mut self, state: &mut StreamState) {
        self.blocks.clear();
        state.close_open_tool_calls();
        state.finish_open_thoughts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::StreamStatus;

    fn run(events: &[serde_json::Value]) -> (StreamState, Vec<StreamStatus>, DecodeFlow) {
        let mut decoder = AnthropicDecoder::new();
        let mut state = StreamState::new(ProviderKind::Anthropic);
        let mut flow = DecodeFlow::Continue;
        for value in events {
            let event = SseEvent {
                data: value.to_string(),
                ..SseEvent::default()
            };
            flow = decoder.decode(&event, &mut state).unwrap();
            if flow == DecodeFlow::Done {
                break;
            }
        }
        decoder.finish(&mut state);
        let statuses = std::iter::from_fn(|| state.pop_emission().map(|e| e.status)).collect();
        (state, statuses, flow)
    }

    #[test]
    fn test_tool_use_closes_at_block_stop() {
        let (state, statuses, flow) = run(&[
            serde_json::json!({"type": "message_start", "message": {"id": "msg_1", "usage": {"input_tokens": 30, "cache_read_input_tokens": 10}}}),
            serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Let me check."}}),
            serde_json::json!({"type": "content_block_stop", "index": 0}),
            serde_json::json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "weather", "input": {}}}),
            serde_json::json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"city\":"}}),
            serde_json::json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"Oslo\"}"}}),
            serde_json::json!({"type": "content_block_stop", "index": 1}),
            serde_json::json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 12}}),
            serde_json::json!({"type": "message_stop"}),
        ]);
        assert_eq!(flow, DecodeFlow::Done);
        assert_eq!(
            statuses,
            vec![
                StreamStatus::MessageStart,
                StreamStatus::Text,
                StreamStatus::ToolCallBegin,
                StreamStatus::ToolCallDelta,
                StreamStatus::ToolCallDelta,
                StreamStatus::ToolCallReady,
            ]
        );
        let call = &state.message().tool_calls[0];
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.arguments, r#"{"city":"Oslo"}"#);
        let usage = state.usage();
        assert_eq!((usage.input_tokens, usage.output_tokens, usage.cached_input_tokens), (30, 12, 10));
    }

    #[test]
    fn test_thinking_block_with_signature() {
        let (state, statuses, _) = run(&[
            serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
            serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "Step one."}}),
            serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "EqQB"}}),
            serde_json::json!({"type": "content_block_stop", "index": 0}),
        ]);
        assert_eq!(statuses, vec![StreamStatus::Thinking, StreamStatus::ThinkingDone]);
        let thought = state.message().thoughts().next().unwrap();
        assert_eq!(thought.text, "Step one.");
        assert_eq!(thought.signature.as_deref(), Some("EqQB"));
    }

    #[test]
    fn test_redacted_thinking_keeps_data() {
        let (state, statuses, _) = run(&[
            serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "redacted_thinking", "data": "opaque"}}),
            serde_json::json!({"type": "content_block_stop", "index": 0}),
        ]);
        assert_eq!(statuses, vec![StreamStatus::ThinkingDone]);
        let thought = state.message().thoughts().next().unwrap();
        assert!(thought.text.is_empty());
        assert_eq!(thought.signature.as_deref(), Some("opaque"));
    }

    #[test]
    fn test_tool_use_with_inline_input() {
        let (state, statuses, _) = run(&[
            serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "t", "name": "f", "input": {"a": 1}}}),
            serde_json::json!({"type": "content_block_stop", "index": 0}),
        ]);
        assert_eq!(state.message().tool_calls[0].arguments, r#"{"a":1}"#);
        assert_eq!(
            statuses,
            vec![StreamStatus::ToolCallBegin, StreamStatus::ToolCallDelta, StreamStatus::ToolCallReady]
        );
    }

    #[test]
    fn test_error_event() {
        let mut decoder = AnthropicDecoder::new();
        let mut state = StreamState::new(ProviderKind::Anthropic);
        let event = SseEvent {
            event: Some("error".into()),
            data: r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#.into(),
            ..SseEvent::default()
        };
        let err = decoder.decode(&event, &mut state).unwrap_err();
        assert!(matches!(err, StreamError::Provider { status: 500, ref kind, .. } if kind == "overloaded_error"));
    }

    #[test]
    fn test_ping_and_unknown_events_ignored() {
        let (_, statuses, flow) = run(&[
            serde_json::json!({"type": "ping"}),
            serde_json::json!({"type": "something_new", "x": 1}),
        ]);
        assert!(statuses.is_empty());
        assert_eq!(flow, DecodeFlow::Continue);
    }
}
