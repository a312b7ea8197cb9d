use tracing::debug;

use crate::error::StreamError;
use crate::protocol::canonical::{ContentItem, ImagePart, Message, Role, Thought};

use super::{AnthropicContentBlock, AnthropicImageSource, AnthropicMessage};

/// Encode conversation history into Anthropic `messages`.
///
/// System messages are left to [`anthropic_system`]. Consecutive tool
/// results share one `user` message. A [`ContentItem::CacheHint`] sets
/// `cache_control` on the block written just before it.
///
/// # Errors
///
/// Returns [`StreamError::Replay`] when a tool result has no
/// `tool_call_id` or a tool call's arguments are not valid JSON.
pub fn encode_anthropic_messages(messages: &[Message]) -> Result<Vec<AnthropicMessage>, StreamError> {
    let mut out: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());
    let mut merging_results = false;

    for message in messages {
        match message.role {
            Role::System => {}
            Role::Tool => {
                let Some(call_id) = &message.tool_call_id else {
                    return Err(StreamError::Replay(
                        "tool result message has no tool_call_id".to_string(),
                    ));
                };
                let block = AnthropicContentBlock::ToolResult {
                    tool_use_id: call_id.clone(),
                    content: message.joined_text(),
                    cache_control: None,
                };
                match out.last_mut() {
                    Some(last) if merging_results => last.content.push(block),
                    _ => out.push(AnthropicMessage {
                        role: "user".to_string(),
                        content: vec![block],
                    }),
                }
                merging_results = true;
                if message.content.iter().any(|c| matches!(c, ContentItem::CacheHint)) {
                    mark_previous_block(&mut [], &mut out);
                }
            }
            Role::User | Role::Assistant => {
                merging_results = false;
                let mut blocks = Vec::with_capacity(message.content.len() + message.tool_calls.len());
                for item in &message.content {
                    encode_item(item, message.role, &mut blocks, &mut out);
                }
                if message.role == Role::Assistant {
                    for call in &message.tool_calls {
                        let input = call.arguments_value().map_err(|err| {
                            StreamError::Replay(format!(
                                "tool call {} has invalid arguments: {err}",
                                call.id
                            ))
                        })?;
                        blocks.push(AnthropicContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input,
                            cache_control: None,
                        });
                    }
                }
                if blocks.is_empty() {
                    debug!(role = ?message.role, "skipping message with no encodable content");
                    continue;
                }
                out.push(AnthropicMessage {
                    role: if message.role == Role::User { "user" } else { "assistant" }.to_string(),
                    content: blocks,
                });
            }
        }
    }
    Ok(out)
}

/// System messages as a top-level `system` block list.
#[must_use]
pub fn anthropic_system(messages: &[Message]) -> Option<Vec<AnthropicContentBlock>> {
    let mut blocks = Vec::new();
    for message in messages.iter().filter(|m| m.role == Role::System) {
        for item in &message.content {
            match item {
                ContentItem::Text(text) => blocks.push(AnthropicContentBlock::Text {
                    text: text.clone(),
                    cache_control: None,
                }),
                ContentItem::CacheHint => mark_previous_block(&mut blocks, &mut []),
                _ => {}
            }
        }
    }
    (!blocks.is_empty()).then_some(blocks)
}

fn encode_item(
    item: &ContentItem,
    role: Role,
    blocks: &mut Vec<AnthropicContentBlock>,
    out: &mut [AnthropicMessage],
) {
    match item {
        ContentItem::Text(text) => {
            if !text.is_empty() {
                blocks.push(AnthropicContentBlock::Text {
                    text: text.clone(),
                    cache_control: None,
                });
            }
        }
        ContentItem::Json(value) => blocks.push(AnthropicContentBlock::Text {
            text: value.to_string(),
            cache_control: None,
        }),
        ContentItem::ImageUrl(image) => blocks.push(AnthropicContentBlock::Image {
            source: image_source(image),
            cache_control: None,
        }),
        ContentItem::Thought(thought) if role == Role::Assistant => {
            if let Some(block) = thinking_block(thought) {
                blocks.push(block);
            }
        }
        ContentItem::Thought(_) => {}
        ContentItem::CacheHint => mark_previous_block(blocks, out),
    }
}

/// Thoughts with text replay as `thinking`; a signature with no text is
/// the payload of a `redacted_thinking` block.
fn thinking_block(thought: &Thought) -> Option<AnthropicContentBlock> {
    match (&thought.signature, thought.text.is_empty()) {
        (Some(data), true) => Some(AnthropicContentBlock::RedactedThinking { data: data.clone() }),
        (_, false) => Some(AnthropicContentBlock::Thinking {
            thinking: thought.text.clone(),
            signature: thought.signature.clone(),
        }),
        (None, true) => None,
    }
}

fn image_source(image: &ImagePart) -> AnthropicImageSource {
    match image.as_base64() {
        Some((media_type, data)) => AnthropicImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        },
        None => AnthropicImageSource::Url {
            url: image.url.clone(),
        },
    }
}

/// Set `cache_control` on the latest cacheable block, looking into already
/// written messages when the current one has none yet.
fn mark_previous_block(blocks: &mut [AnthropicContentBlock], out: &mut [AnthropicMessage]) {
    let current = blocks.iter_mut().rev();
    let earlier = out.iter_mut().rev().flat_map(|m| m.content.iter_mut().rev());
    for block in current.chain(earlier) {
        if block.mark_cacheable() {
            return;
        }
    }
    debug!("cache hint with no preceding cacheable block");
}
