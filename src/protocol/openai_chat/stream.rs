use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::StreamError;
use crate::protocol::canonical::{ProviderKind, Usage};
use crate::stream::{parse_event_json, DecodeFlow, SseEvent, StreamDecoder, StreamState};
use crate::util::is_done_payload;

use super::{ChatChunkChoice, ChatStreamChunk, ChatToolCallDelta, ChatUsage};

/// Finish reasons that end the current tool call.
const TOOL_FINISH_REASONS: &[&str] = &["tool_calls", "function_call"];

#[derive(Debug, Clone)]
struct WireCall {
    provider_id: Option<String>,
    index: usize,
}

/// Decoder for streaming chat completions.
///
/// Tool calls are addressed by their `index`; argument fragments are raw
/// JSON text and are forwarded as-is. A wire index seen before always maps
/// back to the call it started.
#[derive(Debug, Default)]
pub struct OpenAiChatDecoder {
    calls: FxHashMap<usize, WireCall>,
    active: Option<usize>,
}

impl OpenAiChatDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn close_active(&mut self, state: &mut StreamState) {
        if let Some(call) = self.active.take().and_then(|wire| self.calls.get(&wire)) {
            state.finish_tool_call(call.index);
        }
    }

    fn decode_choice(&mut self, choice: &ChatChunkChoice, state: &mut StreamState) {
        let delta = &choice.delta;
        if delta.role.is_some() {
            state.start_message();
        }

        for reasoning in [&delta.reasoning_content, &delta.reasoning].into_iter().flatten() {
            state.push_thinking(None, reasoning, false);
        }

        if let Some(content) = delta.content.as_deref().filter(|c| !c.is_empty()) {
            state.finish_open_thoughts();
            state.push_text(content);
        }

        for call in delta.tool_calls.iter().flatten() {
            self.decode_tool_call(call, state);
        }

        if let Some(function) = &delta.function_call {
            let legacy = ChatToolCallDelta {
                index: 0,
                id: None,
                kind: Some("function".to_string()),
                function: Some(function.clone()),
            };
            self.decode_tool_call(&legacy, state);
        }

        if let Some(reason) = choice.finish_reason.as_deref() {
            if TOOL_FINISH_REASONS.contains(&reason) {
                self.close_active(state);
            }
        }
    }

    fn decode_tool_call(&mut self, call: &ChatToolCallDelta, state: &mut StreamState) {
        let id = call.id.as_deref().filter(|id| !id.is_empty());
        let name = call
            .function
            .as_ref()
            .and_then(|f| f.name.as_deref())
            .unwrap_or_default();

        let known = self
            .calls
            .get(&call.index)
            .filter(|known| id.is_none_or(|id| known.provider_id.as_deref() == Some(id)))
            .map(|known| known.index);

        let index = match known {
            Some(index) => {
                if self.active != Some(call.index) && state.is_ready(index) {
                    debug!(wire_index = call.index, "dropping fragment for a finished tool call");
                    return;
                }
                if !name.is_empty() {
                    if let Some(tool_call) = state.tool_call_mut(index) {
                        if tool_call.name.is_empty() {
                            tool_call.name = name.to_owned();
                        }
                    }
                }
                index
            }
            None => {
                self.close_active(state);
                state.finish_open_thoughts();
                let index = state.begin_tool_call(id, name);
                self.calls.insert(
                    call.index,
                    WireCall {
                        provider_id: id.map(str::to_owned),
                        index,
                    },
                );
                self.active = Some(call.index);
                index
            }
        };

        let fragment = call
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or_default();
        state.append_tool_args(index, fragment);
    }
}

fn usage_from_chat(usage: &ChatUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cached_input_tokens: usage
            .prompt_tokens_details
            .as_ref()
            .map_or(0, |d| d.cached_tokens),
        reasoning_tokens: usage
            .completion_tokens_details
            .as_ref()
            .map_or(0, |d| d.reasoning_tokens),
    }
}

impl StreamDecoder for OpenAiChatDecoder {
    const PROVIDER: ProviderKind = ProviderKind::OpenAiChat;

    fn decode(&mut self, event: &SseEvent, state: &mut StreamState) -> Result<DecodeFlow, StreamError> {
        if is_done_payload(&event.data) {
            return Ok(DecodeFlow::Done);
        }
        let chunk: ChatStreamChunk = parse_event_json(Self::PROVIDER, &event.data)?;

        if let Some(error) = chunk.error {
            return Err(error.into_in_stream_error());
        }
        if let Some(usage) = &chunk.usage {
            state.merge_usage(&usage_from_chat(usage));
        }

        for choice in &chunk.choices {
            if choice.index != 0 {
                debug!(index = choice.index, "ignoring non-primary chat choice");
                continue;
            }
            self.decode_choice(choice, state);
        }
        Ok(DecodeFlow::Continue)
    }

    fn finish(&mut self, state: &mut StreamState) {
        self.close_active(state);
        state.close_open_tool_calls();
        state.finish_open_thoughts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::StreamStatus;

    fn run(lines: &[&str]) -> (StreamState, Vec<StreamStatus>, DecodeFlow) {
        let mut decoder = OpenAiChatDecoder::new();
        let mut state = StreamState::new(ProviderKind::OpenAiChat);
        let mut flow = DecodeFlow::Continue;
        for line in lines {
            let event = SseEvent {
                data: (*line).to_string(),
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
    fn test_index_addressed_arguments() {
        let (state, statuses, flow) = run(&[
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":null}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"search","arguments":"{\"q\":\"hel"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"lo"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":" world\"}"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]);
        assert_eq!(flow, DecodeFlow::Done);
        assert_eq!(
            statuses,
            vec![
                StreamStatus::MessageStart,
                StreamStatus::ToolCallBegin,
                StreamStatus::ToolCallDelta,
                StreamStatus::ToolCallDelta,
                StreamStatus::ToolCallDelta,
                StreamStatus::ToolCallReady,
            ]
        );
        let call = &state.message().tool_calls[0];
        assert_eq!(call.id, "call_1");
        assert_eq!(call.arguments, r#"{"q":"hello world"}"#);
    }

    #[test]
    fn test_new_index_closes_previous_call() {
        let (state, statuses, _) = run(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"f","arguments":"{}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"g","arguments":"{}"}}]}}]}"#,
        ]);
        let readies = statuses.iter().filter(|s| **s == StreamStatus::ToolCallReady).count();
        assert_eq!(readies, 2);
        assert_eq!(state.message().tool_calls.len(), 2);
        let first_ready = statuses.iter().position(|s| *s == StreamStatus::ToolCallReady).unwrap();
        let second_begin = statuses.iter().rposition(|s| *s == StreamStatus::ToolCallBegin).unwrap();
        assert!(first_ready < second_begin);
    }

    #[test]
    fn test_returning_index_never_begins_a_call() {
        let (state, statuses, _) = run(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"f","arguments":"{\"x\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"g","arguments":"{}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"1}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":""}}]}}]}"#,
        ]);
        let calls = &state.message().tool_calls;
        let ids: Vec<_> = calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(calls[1].arguments, "{}");
        let begins = statuses.iter().filter(|s| **s == StreamStatus::ToolCallBegin).count();
        let readies = statuses.iter().filter(|s| **s == StreamStatus::ToolCallReady).count();
        assert_eq!((begins, readies), (2, 2));
    }

    #[test]
    fn test_new_id_at_same_index_begins_new_call() {
        let (state, _, _) = run(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"f","arguments":"{}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"b","function":{"name":"f","arguments":"{}"}}]}}]}"#,
        ]);
        let ids: Vec<_> = state.message().tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_text_reasoning_and_usage() {
        let (state, statuses, _) = run(&[
            r#"{"choices":[{"delta":{"role":"assistant","reasoning_content":"think"}}]}"#,
            r#"{"choices":[{"delta":{"content":""}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hi"}}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":3,"prompt_tokens_details":{"cached_tokens":4},"completion_tokens_details":{"reasoning_tokens":1}}}"#,
        ]);
        assert_eq!(
            statuses,
            vec![
                StreamStatus::MessageStart,
                StreamStatus::Thinking,
                StreamStatus::ThinkingDone,
                StreamStatus::Text,
            ]
        );
        assert_eq!(state.message().joined_text(), "Hi");
        let usage = state.usage();
        assert_eq!((usage.input_tokens, usage.output_tokens), (9, 3));
        assert_eq!((usage.cached_input_tokens, usage.reasoning_tokens), (4, 1));
    }

    #[test]
    fn test_unclosed_call_ready_at_end() {
        let (_, statuses, _) = run(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"x","function":{"name":"f","arguments":"{\"a\":1}"}}]}}]}"#,
        ]);
        assert_eq!(statuses.last(), Some(&StreamStatus::ToolCallReady));
        assert_eq!(statuses.iter().filter(|s| **s == StreamStatus::ToolCallReady).count(), 1);
    }

    #[test]
    fn test_legacy_function_call_delta() {
        let (state, _, _) = run(&[
            r#"{"choices":[{"delta":{"function_call":{"name":"lookup","arguments":"{\"k\""}}}]}"#,
            r#"{"choices":[{"delta":{"function_call":{"arguments":":1}"}},"finish_reason":"function_call"}]}"#,
        ]);
        let call = &state.message().tool_calls[0];
        assert_eq!(call.name, "lookup");
        assert_eq!(call.arguments, r#"{"k":1}"#);
    }

    #[test]
    fn test_error_payload_is_fatal() {
        let mut decoder = OpenAiChatDecoder::new();
        let mut state = StreamState::new(ProviderKind::OpenAiChat);
        let event = SseEvent {
            data: r#"{"error":{"message":"overloaded","type":"server_error"}}"#.into(),
            ..SseEvent::default()
        };
        let err = decoder.decode(&event, &mut state).unwrap_err();
        assert!(matches!(err, StreamError::Provider { ref kind, .. } if kind == "server_error"));
    }
}
