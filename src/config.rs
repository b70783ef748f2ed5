//! Client configuration.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use reqwest::Client as HttpClient;

use crate::error::{ChatError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMPTY_MESSAGES_LIMIT: usize = 300;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const GPT3_DOT_5_TURBO: &str = "gpt-3.5-turbo";
pub const GPT3_DOT_5_TURBO_0301: &str = "gpt-3.5-turbo-0301";

/// Models accepted by the chat completion endpoint unless configured otherwise.
pub const DEFAULT_CHAT_MODELS: [&str; 2] = [GPT3_DOT_5_TURBO, GPT3_DOT_5_TURBO_0301];

/// Configuration for [`Client`](crate::Client).
#[derive(Clone)]
pub struct ClientConfig {
    /// API root, without the `/chat/completions` suffix.
    pub base_url: String,

    /// Bearer token sent in the `Authorization` header.
    pub auth_token: String,

    /// Sent as `OpenAI-Organization` when set.
    pub org_id: Option<String>,

    /// Shared HTTP client; cloning it reuses the same connection pool.
    pub http_client: HttpClient,

    /// Consecutive non-data lines tolerated by a single stream read.
    pub empty_messages_limit: usize,

    /// Total timeout for non-streaming calls. Streams are never time-limited.
    pub request_timeout: Option<Duration>,

    /// Models the chat endpoint accepts.
    pub chat_models: HashSet<String>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("auth_token", &"<redacted>")
            .field("org_id", &self.org_id)
            .field("empty_messages_limit", &self.empty_messages_limit)
            .field("request_timeout", &self.request_timeout)
            .field("chat_models", &self.chat_models)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Create a config with defaults for the given token.
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: auth_token.into(),
            org_id: None,
            http_client: HttpClient::new(),
            empty_messages_limit: DEFAULT_EMPTY_MESSAGES_LIMIT,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            chat_models: DEFAULT_CHAT_MODELS.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Build a config from `OPENAI_*` environment variables.
    ///
    /// `OPENAI_API_KEY` is required; `OPENAI_BASE_URL`, `OPENAI_ORG_ID`,
    /// `OPENAI_EMPTY_MESSAGES_LIMIT` and `OPENAI_TIMEOUT_SECS` are optional.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let auth_token = lookup("OPENAI_API_KEY")
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ChatError::Config("OPENAI_API_KEY must be set".to_string()))?;

        let mut config = Self::new(auth_token);

        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            config = config.with_base_url(base_url);
        }

        if let Some(org_id) = lookup("OPENAI_ORG_ID") {
            config = config.with_org_id(org_id);
        }

        if let Some(limit) = lookup("OPENAI_EMPTY_MESSAGES_LIMIT") {
            let limit = limit.trim().parse().map_err(|e| {
                ChatError::Config(format!("invalid OPENAI_EMPTY_MESSAGES_LIMIT {limit:?}: {e}"))
            })?;
            config = config.with_empty_messages_limit(limit);
        }

        if let Some(secs) = lookup("OPENAI_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|e| {
                ChatError::Config(format!("invalid OPENAI_TIMEOUT_SECS {secs:?}: {e}"))
            })?;
            // zero disables the timeout
            config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Set the API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the organization header.
    pub fn with_org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Use a preconfigured HTTP client.
    pub fn with_http_client(mut self, http_client: HttpClient) -> Self {
        self.http_client = http_client;
        self
    }

    /// Set the keep-alive tolerance for streams.
    pub fn with_empty_messages_limit(mut self, limit: usize) -> Self {
        self.empty_messages_limit = limit;
        self
    }

    /// Set or clear the non-streaming request timeout.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Accept an additional chat model.
    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_models.insert(model.into());
        self
    }

    /// Reject models outside the allow-list.
    pub fn validate_model(&self, model: &str) -> Result<()> {
        if self.chat_models.contains(model) {
            Ok(())
        } else {
            Err(ChatError::InvalidModel(model.to_string()))
        }
    }
}
