//! Provider error bodies.
//!
//! OpenAI-style and Gemini bodies look like `{"error": {"message", "type" |
//! "code" | "status"}}`; Anthropic wraps the same inside
//! `{"type": "error", "error": {"type", "message"}}`. Both are accepted for
//! every provider since proxies mix them freely.

use serde::Deserialize;

use crate::error::StreamError;
use crate::protocol::canonical::ProviderKind;

/// Status reported for error events that arrive inside a 200 stream.
pub(crate) const IN_STREAM_ERROR_STATUS: u16 = 500;

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

impl ApiErrorBody {
    /// Best label for the error: `type`, else `status`, else `code`.
    pub(crate) fn label(&self) -> String {
        if let Some(kind) = self.kind.as_deref().filter(|k| !k.is_empty()) {
            return kind.to_string();
        }
        [&self.status, &self.code]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                serde_json::Value::String(text) if !text.is_empty() => Some(text.clone()),
                serde_json::Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "error".to_string())
    }

    /// Numeric `code`, when the provider put an HTTP status there.
    fn numeric_code(&self) -> Option<u16> {
        self.code
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
    }

    pub(crate) fn into_stream_error(self, status: u16) -> StreamError {
        StreamError::Provider {
            status,
            kind: self.label(),
            message: self.message,
        }
    }

    /// Error event inside an otherwise successful stream.
    pub(crate) fn into_in_stream_error(self) -> StreamError {
        let status = self.numeric_code().unwrap_or(IN_STREAM_ERROR_STATUS);
        self.into_stream_error(status)
    }
}

/// Parse a non-2xx response body into [`StreamError::Provider`].
///
/// Falls back to the HTTP status line (`"429 Too Many Requests"`) when the
/// body has no recognizable error object.
#[must_use]
pub fn parse_error_body(provider: ProviderKind, status: http::StatusCode, body: &[u8]) -> StreamError {
    match serde_json::from_slice::<ApiErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => {
            tracing::warn!(%provider, status = status.as_u16(), "provider returned an error body");
            envelope.error.into_stream_error(status.as_u16())
        }
        _ => {
            let reason = status.canonical_reason().unwrap_or("Unknown Status");
            tracing::warn!(%provider, status = status.as_u16(), "provider error body not recognized");
            StreamError::Provider {
                status: status.as_u16(),
                kind: "http_error".to_string(),
                message: format!("{} {reason}", status.as_u16()),
            }
        }
    }
}
