use tracing::{debug, warn};

use crate::args::ArgsBuilder;
use crate::error::StreamError;
use crate::protocol::canonical::{ImagePart, ProviderKind, Usage};
use crate::stream::{parse_event_json, DecodeFlow, SseEvent, StreamDecoder, StreamState};
use crate::util::is_done_payload;

use super::{GeminiFunctionCall, GeminiPart, GeminiStreamChunk, GeminiUsageMetadata};

const UNSPECIFIED_FINISH_REASON: &str = "FINISH_REASON_UNSPECIFIED";

/// The call currently receiving argument patches.
#[derive(Debug)]
struct ActiveCall {
    index: usize,
    provider_id: Option<String>,
    builder: ArgsBuilder,
}

/// Decoder for `streamGenerateContent?alt=sse` bodies.
///
/// Function call arguments may arrive as a complete `args` object, as
/// `partialArgs` patches, or both; all three go through one
/// [`ArgsBuilder`] per call so every forwarded delta stays a valid prefix.
#[derive(Debug, Default)]
pub struct GeminiDecoder {
    active: Option<ActiveCall>,
}

impl GeminiDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn close_active(&mut self, state: &mut StreamState) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.builder.finalize();
        if let Some(delta) = active.builder.take_delta() {
            state.append_tool_args(active.index, &delta);
        }
        state.finish_tool_call(active.index);
    }

    fn decode_part(&mut self, part: &GeminiPart, state: &mut StreamState) {
        if let Some(call) = &part.function_call {
            self.decode_function_call(call, part.thought_signature.as_deref(), state);
            return;
        }

        if let Some(text) = &part.text {
            if part.thought == Some(true) {
                state.push_thinking(None, text, false);
                if let Some(signature) = &part.thought_signature {
                    state.set_thought_signature(None, signature);
                }
            } else {
                state.finish_open_thoughts();
                state.push_text(text);
                if let Some(signature) = &part.thought_signature {
                    state.sign_last_content(signature);
                }
            }
            return;
        }

        if let Some(blob) = &part.inline_data {
            state.finish_open_thoughts();
            if blob.mime_type.starts_with("image/") {
                state.push_image(ImagePart::from_base64(&blob.mime_type, &blob.data));
            } else {
                state.push_json(serde_json::json!({
                    "inlineData": {"mimeType": blob.mime_type, "data": blob.data}
                }));
            }
            if let Some(signature) = &part.thought_signature {
                state.sign_last_content(signature);
            }
            return;
        }

        if let Some(file) = &part.file_data {
            state.finish_open_thoughts();
            let is_image = file
                .mime_type
                .as_deref()
                .is_some_and(|mime| mime.starts_with("image/"));
            if is_image {
                state.push_image(ImagePart {
                    url: file.file_uri.clone(),
                    detail: None,
                });
            } else {
                state.push_json(serde_json::json!({
                    "fileData": {"mimeType": file.mime_type, "fileUri": file.file_uri}
                }));
            }
            return;
        }

        if let Some(signature) = &part.thought_signature {
            state.sign_last_content(signature);
        }
    }

    fn decode_function_call(
        &mut self,
        call: &GeminiFunctionCall,
        signature: Option<&str>,
        state: &mut StreamState,
    ) {
        if call.is_end_marker() {
            self.close_active(state);
            return;
        }

        let name = call.name.as_deref().filter(|name| !name.is_empty());
        let continues = match (&self.active, call.id.as_deref(), name) {
            (Some(active), Some(id), _) => active.provider_id.as_deref() == Some(id),
            (Some(_), None, None) => true,
            _ => false,
        };

        if !continues {
            self.close_active(state);
            state.finish_open_thoughts();
            let index = state.begin_tool_call(call.id.as_deref(), name.unwrap_or_default());
            self.active = Some(ActiveCall {
                index,
                provider_id: call.id.clone(),
                builder: ArgsBuilder::new(),
            });
        }

        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Some(signature) = signature {
            if let Some(tool_call) = state.tool_call_mut(active.index) {
                tool_call.signature = Some(signature.to_owned());
            }
        }
        if let Some(args) = &call.args {
            active.builder.set_full_args(args);
        }
        for patch in call.partial_args.iter().flatten() {
            active.builder.apply(&patch.to_patch());
        }

        let one_shot = !continues
            && call.id.is_none()
            && call.partial_args.is_none()
            && call.will_continue.is_none();
        let closing = one_shot || call.will_continue == Some(false);
        if closing {
            active.builder.finalize();
        }
        if let Some(delta) = active.builder.take_delta() {
            state.append_tool_args(active.index, &delta);
        }
        if closing {
            self.close_active(state);
        }
    }
}

fn usage_from_metadata(meta: &GeminiUsageMetadata) -> Usage {
    Usage {
        input_tokens: meta.prompt_token_count,
        output_tokens: meta.candidates_token_count + meta.thoughts_token_count,
        cached_input_tokens: meta.cached_content_token_count,
        reasoning_tokens: meta.thoughts_token_count,
    }
}

impl StreamDecoder for GeminiDecoder {
    const PROVIDER: ProviderKind = ProviderKind::Gemini;

    fn decode(&mut self, event: &SseEvent, state: &mut StreamState) -> Result<DecodeFlow, StreamError> {
        if is_done_payload(&event.data) {
            return Ok(DecodeFlow::Done);
        }
        let chunk: GeminiStreamChunk = parse_event_json(Self::PROVIDER, &event.data)?;

        if let Some(error) = chunk.error {
            warn!(code = error.code, status = %error.status, "gemini stream reported an error");
            return Err(StreamError::Provider {
                status: error.code,
                kind: error.status,
                message: error.message,
            });
        }

        if let Some(meta) = &chunk.usage_metadata {
            state.set_usage(usage_from_metadata(meta));
        }

        if chunk.candidates.len() > 1 {
            debug!(count = chunk.candidates.len(), "only the first gemini candidate is decoded");
        }
        let Some(candidate) = chunk.candidates.first() else {
            return Ok(DecodeFlow::Continue);
        };

        state.start_message();
        if let Some(content) = &candidate.content {
            for part in &content.parts {
                self.decode_part(part, state);
            }
        }

        let terminal = candidate
            .finish_reason
            .as_deref()
            .is_some_and(|reason| reason != UNSPECIFIED_FINISH_REASON);
        if terminal {
            self.close_active(state);
        }
        Ok(DecodeFlow::Continue)
    }

    fn finish(&mut self, state: &mut StreamState) {
        self.close_active(state);
        state.close_open_tool_calls();
        state.finish_open_thoughts();
    }
}
