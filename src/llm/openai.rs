use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use tracing::debug;

use super::{sse, ChatCompletion, ChatModel, ChatRequest, ChunkStream};
use crate::error::ModelError;

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Only connecting is bounded; a streamed generation may run as long as
    /// the upstream keeps sending.
    pub fn default_http() -> reqwest::Client {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default()
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, ModelError> {
        if self.api_key.trim().is_empty() {
            return Err(ModelError::NotConfigured);
        }

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream = request.stream,
            "chat completion request"
        );

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|err| ModelError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ModelError> {
        let response = self.send(request).await?;
        response
            .json::<ChatCompletion>()
            .await
            .map_err(|err| ModelError::Parse(err.to_string()))
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChunkStream, ModelError> {
        let response = self.send(request).await?;
        let bytes = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Ok(sse::chat_chunks(bytes).boxed())
    }
}
