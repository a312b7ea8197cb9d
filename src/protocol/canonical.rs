use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque provider-internal fields carried alongside a message or tool call.
pub type ProviderExtensions = serde_json::Map<String, serde_json::Value>;

/// Metadata key holding a provider's per-item identifier (Responses `id`,
/// distinct from the caller-facing call id).
pub const ITEM_ID_KEY: &str = "item_id";

/// Which wire protocol a stream speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Gemini,
    OpenAiChat,
    OpenAiResponses,
    Anthropic,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Gemini => write!(f, "gemini"),
            ProviderKind::OpenAiChat => write!(f, "openai_chat"),
            ProviderKind::OpenAiResponses => write!(f, "openai_responses"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Assistant,
    Tool,
    System,
}

/// One normalized transition of a provider stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    MessageStart,
    Text,
    ToolCallBegin,
    ToolCallDelta,
    ToolCallReady,
    Thinking,
    ThinkingDone,
    Image,
}

/// An image reference: an `https:` URL or a `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImagePart {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ImagePart {
    #[must_use]
    pub fn from_base64(mime_type: &str, data: &str) -> Self {
        let mut url = String::with_capacity(13 + mime_type.len() + data.len());
        url.push_str("data:");
        url.push_str(mime_type);
        url.push_str(";base64,");
        url.push_str(data);
        Self { url, detail: None }
    }

    /// Split a `data:` URI into `(mime_type, base64_payload)`.
    #[must_use]
    pub fn as_base64(&self) -> Option<(&str, &str)> {
        let rest = self.url.strip_prefix("data:")?;
        let (mime, data) = rest.split_once(";base64,")?;
        Some((mime, data))
    }
}

/// Reasoning text, possibly aggregated from many deltas sharing an `id`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Thought {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub summary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// A single item of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContentItem {
    Text(String),
    ImageUrl(ImagePart),
    Json(serde_json::Value),
    Thought(Thought),
    /// Marks everything before it as cacheable prompt prefix.
    CacheHint,
}

/// A model-initiated function invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text; only ever grows while streaming.
    pub arguments: String,
    #[serde(default, skip_serializing_if = "ProviderExtensions::is_empty")]
    pub metadata: ProviderExtensions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ToolCall {
    /// The provider's own per-item identifier, when it issued one.
    #[must_use]
    pub fn item_id(&self) -> Option<&str> {
        self.metadata.get(ITEM_ID_KEY).and_then(|v| v.as_str())
    }

    pub fn set_item_id(&mut self, item_id: impl Into<String>) {
        self.metadata.insert(
            ITEM_ID_KEY.to_string(),
            serde_json::Value::String(item_id.into()),
        );
    }

    /// Arguments parsed as JSON; empty arguments read as `{}`.
    pub fn arguments_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// A conversation message, either aggregated from a stream or supplied by the
/// caller as history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Role::Tool` messages: the call this message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "ProviderExtensions::is_empty")]
    pub metadata: ProviderExtensions,
}

impl Message {
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentItem::Text(text.into())],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentItem::Text(output.into())],
            tool_call_id: Some(tool_call_id.into()),
            ..Self::default()
        }
    }

    /// All text items joined together.
    #[must_use]
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for item in &self.content {
            if let ContentItem::Text(text) = item {
                out.push_str(text);
            }
        }
        out
    }

    #[must_use]
    pub fn item_id(&self) -> Option<&str> {
        self.metadata.get(ITEM_ID_KEY).and_then(|v| v.as_str())
    }

    pub fn thoughts(&self) -> impl Iterator<Item = &Thought> {
        self.content.iter().filter_map(|item| match item {
            ContentItem::Thought(thought) => Some(thought),
            _ => None,
        })
    }
}

/// Token counters as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_input_tokens: u64,
    pub reasoning_tokens: u64,
}

impl Usage {
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Overwrite every counter the other record reports as non-zero.
    pub fn merge(&mut self, other: &Usage) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
        if other.cached_input_tokens > 0 {
            self.cached_input_tokens = other.cached_input_tokens;
        }
        if other.reasoning_tokens > 0 {
            self.reasoning_tokens = other.reasoning_tokens;
        }
    }
}
