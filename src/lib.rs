//! Client for the chat completions API.
//!
//! [`Client::create_chat_completion`] sends one request and waits for the
//! whole answer. [`Client::create_chat_completion_stream`] opens a
//! server-sent event stream and hands back a [`ChatCompletionStream`] that
//! yields incremental deltas until the server sends `data: [DONE]`.

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod stream;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ChatError, Result};
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use models::{
    ApiError, ChatCompletionChoice, ChatCompletionDelta, ChatCompletionMessage,
    ChatCompletionRequest, ChatCompletionResponse, ChatCompletionStreamChoice,
    ChatCompletionStreamResponse, ErrorResponse, Usage,
};
pub use stream::ChatCompletionStream;
