pub mod anthropic;
pub mod canonical;
pub(crate) mod error_shapes;
pub mod gemini;
pub mod openai_chat;
pub mod openai_responses;

pub use error_shapes::parse_error_body;
