pub mod encoder;
pub mod stream;

use serde::{Deserialize, Serialize};

use crate::protocol::error_shapes::ApiErrorBody;

/// Metadata key marking calls that came from a `custom_tool_call` item.
pub const ITEM_TYPE_KEY: &str = "item_type";
pub const CUSTOM_TOOL_CALL: &str = "custom_tool_call";
/// Metadata key naming the reasoning item that directly preceded a message
/// or call item in the stream.
pub const REASONING_ID_KEY: &str = "reasoning_id";

/// One Responses API streaming event. The `type` field selects which of the
/// optional fields are meaningful.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesStreamEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub item: Option<ResponsesItem>,
    pub item_id: Option<String>,
    pub output_index: Option<usize>,
    pub delta: Option<String>,
    pub response: Option<ResponsesEnvelope>,
    /// Top-level fields of the `error` event.
    pub message: Option<String>,
    pub code: Option<serde_json::Value>,
}

/// An output item as carried by `output_item.added` / `output_item.done`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub id: Option<String>,
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
    /// Raw input of a `custom_tool_call`.
    pub input: Option<String>,
    #[serde(default)]
    pub summary: Vec<ResponsesTextPart>,
    #[serde(default)]
    pub content: Vec<ResponsesTextPart>,
    pub encrypted_content: Option<String>,
    /// Base64 payload of an `image_generation_call`.
    pub result: Option<String>,
    pub output_format: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesTextPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub text: Option<String>,
}

/// The `response` object of lifecycle events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesEnvelope {
    pub id: Option<String>,
    pub status: Option<String>,
    pub usage: Option<ResponsesUsage>,
    pub(crate) error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    pub input_tokens_details: Option<ResponsesInputTokensDetails>,
    pub output_tokens_details: Option<ResponsesOutputTokensDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesInputTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesOutputTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// An outbound `input` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesInputItem {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        role: String,
        content: Vec<ResponsesInputContent>,
    },
    Reasoning {
        id: String,
        summary: Vec<ResponsesSummaryText>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encrypted_content: Option<String>,
    },
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
    },
    CustomToolCall {
        id: String,
        call_id: String,
        name: String,
        input: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
    CustomToolCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesInputContent {
    InputText {
        text: String,
    },
    OutputText {
        text: String,
    },
    InputImage {
        image_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsesSummaryText {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ResponsesSummaryText {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "summary_text".to_string(),
            text: text.into(),
        }
    }
}
