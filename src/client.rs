use std::sync::Arc;

use reqwest::header::{ACCEPT, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::models::{ChatCompletionRequest, ChatCompletionResponse, ErrorResponse};
use crate::stream::ChatCompletionStream;

const CHAT_COMPLETIONS_SUFFIX: &str = "/chat/completions";
const ORGANIZATION_HEADER: &str = "OpenAI-Organization";

// cloning is cheap: the http client and the metrics are shared
#[derive(Clone, Debug)]
pub struct Client {
    config: ClientConfig,
    metrics: Arc<ClientMetrics>
}

impl Client {

    pub fn new(auth_token: impl Into<String>) -> Self {

        Self::with_config(ClientConfig::new(auth_token))

    }

    pub fn with_config(config: ClientConfig) -> Self {

        Client {
            config,
            metrics: Arc::new(ClientMetrics::new())
        }

    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn full_url(&self, suffix: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), suffix)
    }

    // validation happens here so a bad model never reaches the network
    fn encode_request(&self, request: &ChatCompletionRequest) -> Result<Vec<u8>> {

        self.config.validate_model(&request.model)?;
        serde_json::to_vec(request).map_err(ChatError::Encode)

    }

    fn post(&self, suffix: &str, body: Vec<u8>) -> RequestBuilder {

        let mut builder = self.config.http_client
            .post(self.full_url(suffix))
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(&self.config.auth_token)
            .body(body);

        if let Some(org_id) = &self.config.org_id {
            builder = builder.header(ORGANIZATION_HEADER, org_id);
        }

        builder

    }

    /// Create a chat completion and wait for the whole response.
    ///
    /// Dropping the returned future cancels the request.
    pub async fn create_chat_completion(
        &self,
        request: ChatCompletionRequest
    ) -> Result<ChatCompletionResponse> {

        let body = self.encode_request(&request)?;

        let mut builder = self.post(CHAT_COMPLETIONS_SUFFIX, body)
            .header(ACCEPT, "application/json; charset=utf-8");

        if let Some(timeout) = self.config.request_timeout {
            builder = builder.timeout(timeout);
        }

        debug!(model = %request.model, messages = request.messages.len(), "sending chat completion");

        let response = self.send(builder).await?;

        let bytes = response.bytes().await.inspect_err(|_| self.metrics.record_failure())?;
        let completion: ChatCompletionResponse = serde_json::from_slice(&bytes)
            .map_err(|err| {
                self.metrics.record_failure();
                ChatError::Decode(err)
            })?;

        self.metrics.record_completion(&completion.usage);
        debug!(id = %completion.id, total_tokens = completion.usage.total_tokens, "chat completion received");

        Ok(completion)

    }

    /// Start a streamed chat completion.
    ///
    /// Forces `stream = true`. Tokens arrive as data-only server-sent events
    /// through [`ChatCompletionStream::recv`], terminated by `data: [DONE]`.
    /// No total timeout is applied to streams.
    pub async fn create_chat_completion_stream(
        &self,
        mut request: ChatCompletionRequest
    ) -> Result<ChatCompletionStream> {

        request.stream = true;
        let body = self.encode_request(&request)?;

        let builder = self.post(CHAT_COMPLETIONS_SUFFIX, body)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive");

        debug!(model = %request.model, messages = request.messages.len(), "opening chat completion stream");

        let response = self.send(builder).await?;

        self.metrics.record_stream();

        let status = response.status();
        let headers = response.headers().clone();

        Ok(ChatCompletionStream::new(
            Box::pin(response.bytes_stream()),
            self.config.empty_messages_limit,
            status,
            headers
        ))

    }

    // sends the request and turns any non-2xx answer into an error,
    // consuming (and so releasing) the body on that path
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {

        let response = builder
            .send()
            .await
            .inspect_err(|_| self.metrics.record_failure())?;

        if response.status().is_success() {
            return Ok(response);
        }

        self.metrics.record_failure();
        let err = error_from_response(response).await;
        warn!(status = ?err.status_code(), error = %err, "chat completion request failed");
        Err(err)

    }

}

async fn error_from_response(response: Response) -> ChatError {

    let status_code = response.status().as_u16();

    let body = match response.bytes().await {
        Ok(body) => body,
        Err(err) => return ChatError::Request { status_code, message: err.to_string() }
    };

    match serde_json::from_slice::<ErrorResponse>(&body) {
        Ok(ErrorResponse { error: Some(mut api_error) }) => {
            api_error.status_code = status_code;
            ChatError::Api(api_error)
        }
        Ok(ErrorResponse { error: None }) => ChatError::Request {
            status_code,
            message: "response carried no error object".to_string()
        },
        Err(err) => ChatError::Request { status_code, message: err.to_string() }
    }

}
