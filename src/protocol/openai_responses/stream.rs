use tracing::{debug, trace};

use crate::error::StreamError;
use crate::protocol::canonical::{ImagePart, ProviderKind, Usage, ITEM_ID_KEY};
use crate::protocol::error_shapes::ApiErrorBody;
use crate::stream::{parse_event_json, DecodeFlow, SseEvent, StreamDecoder, StreamState};
use crate::util::is_done_payload;

use super::{
    ResponsesItem, ResponsesStreamEvent, ResponsesTextPart, ResponsesUsage, CUSTOM_TOOL_CALL,
    ITEM_TYPE_KEY, REASONING_ID_KEY,
};

#[derive(Debug, Clone)]
struct ActiveCall {
    item_id: Option<String>,
    index: usize,
}

/// Decoder for Responses API streams.
///
/// Content arrives only through `*.delta` events; the matching `*.done`
/// events repeat it and are skipped. `output_item.done` only fills gaps
/// (items that never streamed deltas) and closes the item.
#[derive(Debug, Default)]
pub struct OpenAiResponsesDecoder {
    active: Option<ActiveCall>,
    /// Reasoning item not yet followed by a message or call item.
    last_reasoning: Option<String>,
}

impl OpenAiResponsesDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn close_active(&mut self, state: &mut StreamState) {
        if let Some(active) = self.active.take() {
            state.finish_tool_call(active.index);
        }
    }

    /// Index of the call `item_id` addresses; the active call when the
    /// event carries no item id.
    fn call_index(&self, item_id: Option<&str>, state: &StreamState) -> Option<usize> {
        if let Some(active) = &self.active {
            if item_id.is_none() || active.item_id.as_deref() == item_id {
                return Some(active.index);
            }
        }
        let item_id = item_id?;
        state
            .message()
            .tool_calls
            .iter()
            .position(|call| call.item_id() == Some(item_id))
    }

    fn item_added(&mut self, item: &ResponsesItem, state: &mut StreamState) {
        match item.kind.as_str() {
            "message" => {
                state.start_message();
                let metadata = &mut state.message_mut().metadata;
                if let Some(id) = &item.id {
                    metadata.insert(ITEM_ID_KEY.to_string(), serde_json::Value::String(id.clone()));
                }
                if let Some(reasoning) = self.last_reasoning.take() {
                    metadata.insert(REASONING_ID_KEY.to_string(), serde_json::Value::String(reasoning));
                }
            }
            "function_call" | CUSTOM_TOOL_CALL => {
                self.close_active(state);
                let name = item.name.as_deref().unwrap_or_default();
                let index = state.begin_tool_call(item.call_id.as_deref(), name);
                if let Some(call) = state.tool_call_mut(index) {
                    if let Some(id) = &item.id {
                        call.set_item_id(id.clone());
                    }
                    if item.kind == CUSTOM_TOOL_CALL {
                        call.metadata.insert(
                            ITEM_TYPE_KEY.to_string(),
                            serde_json::Value::String(CUSTOM_TOOL_CALL.to_string()),
                        );
                    }
                    if let Some(reasoning) = self.last_reasoning.take() {
                        call.metadata
                            .insert(REASONING_ID_KEY.to_string(), serde_json::Value::String(reasoning));
                    }
                }
                let initial = item.arguments.as_deref().or(item.input.as_deref());
                if let Some(initial) = initial {
                    state.append_tool_args(index, initial);
                }
                self.active = Some(ActiveCall {
                    item_id: item.id.clone(),
                    index,
                });
            }
            "reasoning" => {
                state.open_thought(item.id.as_deref(), true);
                if item.id.is_some() {
                    self.last_reasoning.clone_from(&item.id);
                }
            }
            other => debug!(item_type = other, "ignoring responses output item"),
        }
    }

    fn item_done(&mut self, item: &ResponsesItem, state: &mut StreamState) {
        match item.kind.as_str() {
            "image_generation_call" => {
                if let Some(result) = item.result.as_deref().filter(|r| !r.is_empty()) {
                    let format = item.output_format.as_deref().unwrap_or("png");
                    state.push_image(ImagePart::from_base64(&format!("image/{format}"), result));
                }
            }
            "reasoning" => {
                let id = item.id.as_deref();
                let summary = join_parts(&item.summary);
                if summary.is_empty() {
                    state.backfill_thought(id, &join_parts(&item.content), false);
                } else {
                    state.backfill_thought(id, &summary, true);
                }
                if let Some(encrypted) = &item.encrypted_content {
                    state.set_thought_signature(id, encrypted);
                }
                state.finish_thought(id);
            }
            "function_call" | CUSTOM_TOOL_CALL => {
                let Some(index) = self.call_index(item.id.as_deref(), state) else {
                    debug!(item_id = ?item.id, "output_item.done for an unknown call");
                    return;
                };
                let streamed = state
                    .message()
                    .tool_calls
                    .get(index)
                    .is_some_and(|call| !call.arguments.is_empty());
                if !streamed {
                    let full = item.arguments.as_deref().or(item.input.as_deref());
                    if let Some(full) = full {
                        state.append_tool_args(index, full);
                    }
                }
                state.finish_tool_call(index);
                if self.active.as_ref().is_some_and(|a| a.index == index) {
                    self.active = None;
                }
            }
            _ => {}
        }
    }

    fn argument_delta(&mut self, event: &ResponsesStreamEvent, state: &mut StreamState) {
        let Some(delta) = event.delta.as_deref() else {
            return;
        };
        match self.call_index(event.item_id.as_deref(), state) {
            Some(index) => state.append_tool_args(index, delta),
            None => debug!(item_id = ?event.item_id, "argument delta for an unknown call"),
        }
    }
}

fn join_parts(parts: &[ResponsesTextPart]) -> String {
    let texts: Vec<&str> = parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .filter(|text| !text.is_empty())
        .collect();
    texts.join("\n\n")
}

fn usage_from_responses(usage: &ResponsesUsage) -> Usage {
    Usage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cached_input_tokens: usage
            .input_tokens_details
            .as_ref()
            .map_or(0, |d| d.cached_tokens),
        reasoning_tokens: usage
            .output_tokens_details
            .as_ref()
            .map_or(0, |d| d.reasoning_tokens),
    }
}

impl StreamDecoder for OpenAiResponsesDecoder {
    const PROVIDER: ProviderKind = ProviderKind::OpenAiResponses;

    fn decode(&mut self, event: &SseEvent, state: &mut StreamState) -> Result<DecodeFlow, StreamError> {
        if is_done_payload(&event.data) {
            return Ok(DecodeFlow::Done);
        }
        let mut parsed: ResponsesStreamEvent = parse_event_json(Self::PROVIDER, &event.data)?;
        if parsed.kind.is_empty() {
            parsed.kind = event.event.clone().unwrap_or_default();
        }

        match parsed.kind.as_str() {
            "response.created" | "response.in_progress" => state.start_message(),
            "response.output_item.added" => {
                if let Some(item) = &parsed.item {
                    self.item_added(item, state);
                }
            }
            "response.output_item.done" => {
                if let Some(item) = &parsed.item {
                    self.item_done(item, state);
                }
            }
            "response.output_text.delta" | "response.refusal.delta" => {
                if let Some(delta) = parsed.delta.as_deref() {
                    state.push_text(delta);
                }
            }
            "response.function_call_arguments.delta" | "response.custom_tool_call_input.delta" => {
                self.argument_delta(&parsed, state);
            }
            "response.reasoning_summary_text.delta" => {
                if let Some(delta) = parsed.delta.as_deref() {
                    state.push_thinking(parsed.item_id.as_deref(), delta, true);
                }
            }
            "response.reasoning_text.delta" => {
                if let Some(delta) = parsed.delta.as_deref() {
                    state.push_thinking(parsed.item_id.as_deref(), delta, false);
                }
            }
            "response.completed" | "response.incomplete" => {
                if let Some(usage) = parsed.response.as_ref().and_then(|r| r.usage.as_ref()) {
                    state.merge_usage(&usage_from_responses(usage));
                }
                self.close_active(state);
                return Ok(DecodeFlow::Done);
            }
            "response.failed" => {
                let body = parsed
                    .response
                    .and_then(|r| r.error)
                    .unwrap_or_else(|| ApiErrorBody {
                        message: "response failed".to_string(),
                        ..ApiErrorBody::default()
                    });
                return Err(body.into_in_stream_error());
            }
            "error" => {
                let body = ApiErrorBody {
                    message: parsed.message.unwrap_or_else(|| "stream error".to_string()),
                    code: parsed.code,
                    ..ApiErrorBody::default()
                };
                return Err(body.into_in_stream_error());
            }
            other => trace!(event_type = other, "skipping responses event"),
        }
        Ok(DecodeFlow::Continue)
    }

    fn finish(&mut self, state: &mut StreamState) {
        self.close_active(state);
        state.close_open_tool_calls();
        state.finish_open_thoughts();
    }
}
