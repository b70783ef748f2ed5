//! Error types for the chat completion client.

use crate::models::ApiError;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors surfaced by requests and by stream reads.
///
/// Nothing here is retried; every failure reaches the immediate caller.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("unsupported chat completion model: {0}")]
    InvalidModel(String),

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// Non-2xx response whose body did not carry a usable error object.
    #[error("status code {status_code}, message: {message}")]
    Request { status_code: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("chat stream has sent too many empty messages")]
    TooManyEmptyStreamMessages,

    #[error("stream ended before the [DONE] marker")]
    UnexpectedEof,

    #[error("stream is closed")]
    StreamClosed,

    #[error("configuration error: {0}")]
    Config(String),
}

impl ChatError {

    /// Status code of an API-level failure, if the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ChatError::Api(err) => Some(err.status_code),
            ChatError::Request { status_code, .. } => Some(*status_code),
            ChatError::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

}
