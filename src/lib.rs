//! Normalized streaming for Gemini, OpenAI Chat, OpenAI Responses and
//! Anthropic completion streams.
//!
//! Each provider's SSE vocabulary is decoded into one status sequence
//! ([`StreamStatus`]) over one aggregated [`Message`]. Tool-call arguments
//! that arrive as path-addressed patches are rebuilt by [`ArgsBuilder`]
//! without ever retracting bytes already handed to the caller.

pub mod args;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod stream;
pub mod transport;

mod util;

pub use args::{ArgPatch, ArgsBuilder};
pub use config::StreamConfig;
pub use error::{ErrorCategory, StreamError};
pub use protocol::canonical::{
    ContentItem, ImagePart, Message, ProviderKind, Role, StreamStatus, Thought, ToolCall, Usage,
};
pub use protocol::parse_error_body;
pub use stream::{DecodeFlow, ProviderStream, SseEvent, StreamDecoder, StreamState};
pub use transport::{open_stream, stream_from_parts};

pub use protocol::anthropic::encoder::encode_anthropic_messages;
pub use protocol::gemini::encoder::encode_gemini_contents;
pub use protocol::openai_chat::encoder::encode_openai_messages;
pub use protocol::openai_responses::encoder::encode_responses_input;

pub type GeminiStream = ProviderStream<protocol::gemini::stream::GeminiDecoder>;
pub type OpenAiChatStream = ProviderStream<protocol::openai_chat::stream::OpenAiChatDecoder>;
pub type OpenAiResponsesStream =
    ProviderStream<protocol::openai_responses::stream::OpenAiResponsesDecoder>;
pub type AnthropicStream = ProviderStream<protocol::anthropic::stream::AnthropicDecoder>;
