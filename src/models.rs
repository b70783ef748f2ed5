use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatCompletionMessage {
    pub role: String,
    pub content: String
}

impl ChatCompletionMessage {

    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {

        ChatCompletionMessage {
            role: role.into(),
            content: content.into()
        }

    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ROLE_SYSTEM, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ROLE_USER, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ROLE_ASSISTANT, content)
    }

}

/// Request body for `POST /chat/completions`.
///
/// Generation parameters left as `None` never reach the wire, and `stream`
/// is only written when it is `true`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatCompletionMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub logit_bias: HashMap<String, i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>
}

impl ChatCompletionRequest {

    pub fn new(model: impl Into<String>, messages: Vec<ChatCompletionMessage>) -> Self {

        ChatCompletionRequest {
            model: model.into(),
            messages,
            ..Default::default()
        }

    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_n(mut self, n: u32) -> Self {
        self.n = Some(n);
        self
    }

    pub fn with_stop(mut self, stop: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    pub fn with_frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn with_logit_bias(mut self, token: impl Into<String>, bias: i32) -> Self {
        self.logit_bias.insert(token.into(), bias);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatCompletionMessage,
    #[serde(default)]
    pub finish_reason: Option<String>
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    pub usage: Usage
}

impl ChatCompletionResponse {

    // text of the first choice, which is the only one unless `n` was set
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|choice| choice.message.content.as_str())
    }

}

// the first chunk of a stream usually carries only the role and the last
// one carries nothing, so both fields tolerate absence
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ChatCompletionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: String
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatCompletionStreamChoice {
    pub index: u32,
    pub delta: ChatCompletionDelta,
    #[serde(default)]
    pub finish_reason: Option<String>
}

/// One `data:` frame of a streamed chat completion.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatCompletionStreamResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionStreamChoice>
}

impl ChatCompletionStreamResponse {

    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|choice| choice.delta.content.as_str())
    }

}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<ApiError>
}

/// Structured error returned by the API for a non-2xx status.
///
/// `status_code` is not part of the body; the client fills it in from the
/// HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, thiserror::Error)]
#[error("api error (status {status_code}): {message}")]
pub struct ApiError {
    // either a string ("invalid_api_key") or a number, depending on the endpoint
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    pub message: String,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(skip)]
    pub status_code: u16
}
