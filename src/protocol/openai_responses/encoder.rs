use rustc_hash::FxHashSet;
use tracing::debug;

use crate::error::StreamError;
use crate::protocol::canonical::{ContentItem, Message, ProviderExtensions, Role, Thought, ToolCall};

use super::{
    ResponsesInputContent, ResponsesInputItem, ResponsesSummaryText, CUSTOM_TOOL_CALL,
    ITEM_TYPE_KEY, REASONING_ID_KEY,
};

/// Encode conversation history into a Responses `input` array.
///
/// An assistant turn expands to its message item, then one item per tool
/// call. Each reasoning item goes directly before the item that followed it
/// in the stream; reasoning with no recorded follower leads the turn.
/// Function-call items must echo the provider's item id, so a call without
/// one cannot be replayed.
///
/// # Errors
///
/// Returns [`StreamError::Replay`] when an assistant tool call has no item
/// id or a tool result has no `tool_call_id`.
pub fn encode_responses_input(messages: &[Message]) -> Result<Vec<ResponsesInputItem>, StreamError> {
    let mut items = Vec::with_capacity(messages.len());
    let mut custom_calls: FxHashSet<&str> = FxHashSet::default();

    for message in messages {
        match message.role {
            Role::System | Role::User => {
                let content = input_content(message);
                if !content.is_empty() {
                    items.push(ResponsesInputItem::Message {
                        id: None,
                        role: if message.role == Role::System { "system" } else { "user" }.to_string(),
                        content,
                    });
                }
            }
            Role::Assistant => {
                for call in &message.tool_calls {
                    if is_custom(call) {
                        custom_calls.insert(call.id.as_str());
                    }
                }
                encode_assistant(message, &mut items)?;
            }
            Role::Tool => {
                let Some(call_id) = message.tool_call_id.clone() else {
                    return Err(StreamError::Replay(
                        "tool result message has no tool_call_id".to_string(),
                    ));
                };
                let output = message.joined_text();
                if custom_calls.contains(call_id.as_str()) {
                    items.push(ResponsesInputItem::CustomToolCallOutput { call_id, output });
                } else {
                    items.push(ResponsesInputItem::FunctionCallOutput { call_id, output });
                }
            }
        }
    }
    Ok(items)
}

fn is_custom(call: &ToolCall) -> bool {
    call.metadata.get(ITEM_TYPE_KEY).and_then(|v| v.as_str()) == Some(CUSTOM_TOOL_CALL)
}

fn input_content(message: &Message) -> Vec<ResponsesInputContent> {
    message
        .content
        .iter()
        .filter_map(|item| match item {
            ContentItem::Text(text) => Some(ResponsesInputContent::InputText { text: text.clone() }),
            ContentItem::Json(value) => Some(ResponsesInputContent::InputText {
                text: value.to_string(),
            }),
            ContentItem::ImageUrl(image) => Some(ResponsesInputContent::InputImage {
                image_url: image.url.clone(),
                detail: image.detail.clone(),
            }),
            ContentItem::Thought(_) | ContentItem::CacheHint => None,
        })
        .collect()
}

fn reasoning_item(thought: &Thought) -> Option<ResponsesInputItem> {
    let Some(id) = thought.id.clone() else {
        debug!("skipping reasoning without an item id");
        return None;
    };
    let summary = if thought.summary && !thought.text.is_empty() {
        vec![ResponsesSummaryText::new(thought.text.clone())]
    } else {
        Vec::new()
    };
    Some(ResponsesInputItem::Reasoning {
        id,
        summary,
        encrypted_content: thought.signature.clone(),
    })
}

fn reasoning_anchor(metadata: &ProviderExtensions) -> Option<&str> {
    metadata.get(REASONING_ID_KEY).and_then(|v| v.as_str())
}

/// Reasoning items in stream order, handed out to the items they preceded.
struct ReasoningQueue {
    items: Vec<(String, ResponsesInputItem)>,
    next: usize,
}

impl ReasoningQueue {
    fn new(message: &Message) -> Self {
        let items = message
            .thoughts()
            .filter_map(|thought| {
                let id = thought.id.clone()?;
                reasoning_item(thought).map(|item| (id, item))
            })
            .collect();
        Self { items, next: 0 }
    }

    /// Move every queued item up to and including `anchor` into `out`.
    fn claim(&mut self, anchor: Option<&str>, out: &mut Vec<ResponsesInputItem>) {
        let Some(anchor) = anchor else {
            return;
        };
        let Some(offset) = self.items[self.next..].iter().position(|(id, _)| id == anchor) else {
            return;
        };
        let end = self.next + offset + 1;
        out.extend(self.items[self.next..end].iter().map(|(_, item)| item.clone()));
        self.next = end;
    }

    fn rest(&self) -> impl Iterator<Item = ResponsesInputItem> + '_ {
        self.items[self.next..].iter().map(|(_, item)| item.clone())
    }
}

fn encode_assistant(message: &Message, items: &mut Vec<ResponsesInputItem>) -> Result<(), StreamError> {
    let mut reasoning = ReasoningQueue::new(message);
    let mut turn = Vec::with_capacity(reasoning.items.len() + message.tool_calls.len() + 1);

    let content: Vec<ResponsesInputContent> = message
        .content
        .iter()
        .filter_map(|item| match item {
            ContentItem::Text(text) => Some(ResponsesInputContent::OutputText { text: text.clone() }),
            ContentItem::Json(value) => Some(ResponsesInputContent::OutputText {
                text: value.to_string(),
            }),
            _ => None,
        })
        .collect();
    if !content.is_empty() {
        reasoning.claim(reasoning_anchor(&message.metadata), &mut turn);
        turn.push(ResponsesInputItem::Message {
            id: message.item_id().map(str::to_owned),
            role: "assistant".to_string(),
            content,
        });
    }

    for call in &message.tool_calls {
        let Some(item_id) = call.item_id() else {
            return Err(StreamError::Replay(format!(
                "tool call {} has no item id and cannot be replayed",
                call.id
            )));
        };
        reasoning.claim(reasoning_anchor(&call.metadata), &mut turn);
        let item = if is_custom(call) {
            ResponsesInputItem::CustomToolCall {
                id: item_id.to_string(),
                call_id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            }
        } else {
            ResponsesInputItem::FunctionCall {
                id: item_id.to_string(),
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: if call.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    call.arguments.clone()
                },
            }
        };
        turn.push(item);
    }

    if reasoning.next == 0 {
        items.extend(reasoning.rest());
        items.extend(turn);
    } else {
        items.extend(turn);
        items.extend(reasoning.rest());
    }
    Ok(())
}
