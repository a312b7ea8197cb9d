use rustc_hash::FxHashMap;

use crate::error::StreamError;
use crate::protocol::canonical::{ContentItem, ImagePart, Message, Role, ToolCall};
use crate::protocol::gemini::{
    GeminiBlob, GeminiContent, GeminiFileData, GeminiFunctionCall, GeminiFunctionResponse,
    GeminiPart,
};

/// Role carrying merged tool results.
pub const FUNCTION_ROLE: &str = "function";

/// Encode conversation history into Gemini `contents`.
///
/// System messages are skipped (see [`gemini_system_instruction`]).
/// Consecutive tool-result messages are merged into one `function` content
/// holding one `functionResponse` per call.
///
/// # Errors
///
/// Returns [`StreamError::Replay`] when a tool result references a call id
/// that no earlier assistant message issued, or when replayed call
/// arguments are not valid JSON.
pub fn encode_gemini_contents(messages: &[Message]) -> Result<Vec<GeminiContent>, StreamError> {
    let mut call_names: FxHashMap<&str, &str> = FxHashMap::default();
    let mut contents: Vec<GeminiContent> = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::System => {}
            Role::Tool => {
                let part = encode_tool_result(message, &call_names)?;
                match contents.last_mut() {
                    Some(last) if last.role.as_deref() == Some(FUNCTION_ROLE) => last.parts.push(part),
                    _ => contents.push(GeminiContent {
                        role: Some(FUNCTION_ROLE.to_string()),
                        parts: vec![part],
                    }),
                }
            }
            Role::User | Role::Assistant => {
                for call in &message.tool_calls {
                    call_names.insert(call.id.as_str(), call.name.as_str());
                }
                let role = if message.role == Role::User { "user" } else { "model" };
                let parts = encode_parts(message)?;
                if !parts.is_empty() {
                    contents.push(GeminiContent {
                        role: Some(role.to_string()),
                        parts,
                    });
                }
            }
        }
    }

    Ok(contents)
}

/// Text of every system message, as a `systemInstruction` content.
#[must_use]
pub fn gemini_system_instruction(messages: &[Message]) -> Option<GeminiContent> {
    let parts: Vec<GeminiPart> = messages
        .iter()
        .filter(|message| message.role == Role::System)
        .map(|message| GeminiPart::text(message.joined_text()))
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(GeminiContent { role: None, parts })
}

fn encode_parts(message: &Message) -> Result<Vec<GeminiPart>, StreamError> {
    let mut parts = Vec::with_capacity(message.content.len() + message.tool_calls.len());
    // A signature that arrived without thought text rides on the next part.
    let mut pending_signature: Option<String> = None;

    for item in &message.content {
        let mut part = match item {
            ContentItem::Text(text) => GeminiPart::text(text.clone()),
            ContentItem::Thought(thought) => {
                if thought.text.is_empty() {
                    pending_signature = thought.signature.clone().or(pending_signature);
                    continue;
                }
                GeminiPart {
                    thought: Some(true),
                    thought_signature: thought.signature.clone(),
                    ..GeminiPart::text(thought.text.clone())
                }
            }
            ContentItem::ImageUrl(image) => encode_image(image),
            ContentItem::Json(value) => GeminiPart::text(value.to_string()),
            ContentItem::CacheHint => continue,
        };
        if part.thought_signature.is_none() {
            part.thought_signature = pending_signature.take();
        }
        parts.push(part);
    }

    for call in &message.tool_calls {
        let mut part = encode_tool_call(call)?;
        if part.thought_signature.is_none() {
            part.thought_signature = pending_signature.take();
        }
        parts.push(part);
    }
    Ok(parts)
}

fn encode_image(image: &ImagePart) -> GeminiPart {
    match image.as_base64() {
        Some((mime_type, data)) => GeminiPart {
            inline_data: Some(GeminiBlob {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
            }),
            ..GeminiPart::default()
        },
        None => GeminiPart {
            file_data: Some(GeminiFileData {
                mime_type: None,
                file_uri: image.url.clone(),
            }),
            ..GeminiPart::default()
        },
    }
}

fn encode_tool_call(call: &ToolCall) -> Result<GeminiPart, StreamError> {
    let args = match call.arguments_value() {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            return Err(StreamError::Replay(format!(
                "tool call '{}' has arguments that are not a JSON object",
                call.id
            )));
        }
    };
    Ok(GeminiPart {
        function_call: Some(GeminiFunctionCall {
            id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            args: Some(args),
            ..GeminiFunctionCall::default()
        }),
        thought_signature: call.signature.clone(),
        ..GeminiPart::default()
    })
}

fn encode_tool_result(
    message: &Message,
    call_names: &FxHashMap<&str, &str>,
) -> Result<GeminiPart, StreamError> {
    let Some(call_id) = message.tool_call_id.as_deref() else {
        return Err(StreamError::Replay(
            "tool result message has no tool_call_id".to_string(),
        ));
    };
    let Some(name) = call_names.get(call_id) else {
        return Err(StreamError::Replay(format!(
            "tool result references unknown call '{call_id}'"
        )));
    };

    let output = message.joined_text();
    let response = match serde_json::from_str::<serde_json::Value>(&output) {
        Ok(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
        _ => serde_json::json!({ "output": output }),
    };
    Ok(GeminiPart {
        function_response: Some(GeminiFunctionResponse {
            id: Some(call_id.to_string()),
            name: (*name).to_string(),
            response,
        }),
        ..GeminiPart::default()
    })
}
