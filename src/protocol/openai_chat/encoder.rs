use crate::error::StreamError;
use crate::protocol::canonical::{ContentItem, Message, Role};
use crate::protocol::openai_chat::{
    ChatContentPart, ChatFunction, ChatImageUrl, ChatMessage, ChatMessageContent, ChatToolCall,
};

/// Encode conversation history into chat completion `messages`.
///
/// Tool results become one `tool` message each. Assistant reasoning is
/// replayed through `reasoning_content`, the field the reasoning-capable
/// chat backends read back.
///
/// # Errors
///
/// Returns [`StreamError::Replay`] when a tool result has no
/// `tool_call_id`.
pub fn encode_openai_messages(messages: &[Message]) -> Result<Vec<ChatMessage>, StreamError> {
    messages.iter().map(encode_message).collect()
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
        Role::System => "system",
    }
}

fn encode_message(message: &Message) -> Result<ChatMessage, StreamError> {
    let mut chat = ChatMessage {
        role: role_name(message.role).to_string(),
        content: None,
        reasoning_content: None,
        tool_calls: None,
        tool_call_id: None,
    };

    if message.role == Role::Tool {
        let Some(call_id) = &message.tool_call_id else {
            return Err(StreamError::Replay(
                "tool result message has no tool_call_id".to_string(),
            ));
        };
        chat.tool_call_id = Some(call_id.clone());
        chat.content = Some(ChatMessageContent::Text(message.joined_text()));
        return Ok(chat);
    }

    let mut parts: Vec<ChatContentPart> = Vec::with_capacity(message.content.len());
    let mut reasoning = String::new();
    for item in &message.content {
        match item {
            ContentItem::Text(text) => parts.push(ChatContentPart::Text { text: text.clone() }),
            ContentItem::ImageUrl(image) => parts.push(ChatContentPart::ImageUrl {
                image_url: ChatImageUrl {
                    url: image.url.clone(),
                    detail: image.detail.clone(),
                },
            }),
            ContentItem::Json(value) => parts.push(ChatContentPart::Text {
                text: value.to_string(),
            }),
            ContentItem::Thought(thought) => reasoning.push_str(&thought.text),
            ContentItem::CacheHint => {}
        }
    }

    chat.content = collapse_parts(parts);
    if message.role == Role::Assistant && !reasoning.is_empty() {
        chat.reasoning_content = Some(reasoning);
    }
    if !message.tool_calls.is_empty() {
        chat.tool_calls = Some(
            message
                .tool_calls
                .iter()
                .map(|call| ChatToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: ChatFunction {
                        name: call.name.clone(),
                        arguments: if call.arguments.is_empty() {
                            "{}".to_string()
                        } else {
                            call.arguments.clone()
                        },
                    },
                })
                .collect(),
        );
    }
    Ok(chat)
}

/// Text-only content is sent as a plain string.
fn collapse_parts(parts: Vec<ChatContentPart>) -> Option<ChatMessageContent> {
    if parts.is_empty() {
        return None;
    }
    if parts.iter().all(|p| matches!(p, ChatContentPart::Text { .. })) {
        let mut text = String::new();
        for part in parts {
            if let ChatContentPart::Text { text: t } = part {
                text.push_str(&t);
            }
        }
        return Some(ChatMessageContent::Text(text));
    }
    Some(ChatMessageContent::Parts(parts))
}
