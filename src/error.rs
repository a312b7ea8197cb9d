use crate::protocol::canonical::ProviderKind;

/// Error type shared by every decoder, encoder and the transport boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Stream cancelled")]
    Cancelled,
    #[error("Malformed {provider} event: {message}")]
    MalformedEvent {
        provider: ProviderKind,
        message: String,
    },
    #[error("Provider error: status={status}, type={kind}, message={message}")]
    Provider {
        status: u16,
        kind: String,
        message: String,
    },
    #[error("Replay error: {0}")]
    Replay(String),
    #[error("Config error: {0}")]
    Config(String),
}

/// Broad error category, so callers can tell "cannot continue this
/// conversation" apart from "the network failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Cancelled,
    Protocol,
    Provider,
    Replay,
    Config,
}

impl StreamError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Transport(_) => ErrorCategory::Transport,
            StreamError::Cancelled => ErrorCategory::Cancelled,
            StreamError::MalformedEvent { .. } => ErrorCategory::Protocol,
            StreamError::Provider { .. } => ErrorCategory::Provider,
            StreamError::Replay(_) => ErrorCategory::Replay,
            StreamError::Config(_) => ErrorCategory::Config,
        }
    }

    /// Whether a caller-side retry of the whole request could succeed.
    ///
    /// Nothing in this crate retries on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Transport(_) => true,
            StreamError::Provider { status, .. } => {
                matches!(*status, 408 | 429 | 500..=599)
            }
            StreamError::Cancelled
            | StreamError::MalformedEvent { .. }
            | StreamError::Replay(_)
            | StreamError::Config(_) => false,
        }
    }

    pub(crate) fn malformed(provider: ProviderKind, message: impl Into<String>) -> Self {
        StreamError::MalformedEvent {
            provider,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}
