use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{ChatError, Result};
use crate::server::knowledge::Embedder;
use crate::streaming::{take_utf8_prefix, SseDecoder, DONE_SENTINEL};

/// Message in a chat-completion prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Anything that can stream a completion token by token
#[async_trait]
pub trait ReplySource: Send + Sync {
    async fn stream_reply(&self, messages: Vec<PromptMessage>) -> Result<BoxStream<'static, Result<String>>>;
}

/// Client for an OpenAI-compatible API
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        chat_model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            chat_model: chat_model.into(),
            embedding_model: embedding_model.into(),
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        Err(ChatError::Upstream(format!("{}: {}", status, error_text)))
    }

    /// Forward `delta.content` of every chunk until `[DONE]` or end of body
    async fn process_sse_stream(response: reqwest::Response, tx: mpsc::Sender<Result<String>>) {
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut pending = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };

            pending.extend_from_slice(&chunk);
            for data in decoder.push(&take_utf8_prefix(&mut pending)) {
                if data == DONE_SENTINEL {
                    return;
                }
                if let Some(message) = upstream_error(&data) {
                    tracing::warn!(error = %message, "completion stream reported an error");
                    let _ = tx.send(Err(ChatError::Upstream(message))).await;
                    return;
                }
                if let Some(content) = delta_content(&data) {
                    if tx.send(Ok(content)).await.is_err() {
                        return;
                    }
                }
            }
        }

        if let Some(data) = decoder.finish() {
            if let Some(content) = delta_content(&data) {
                let _ = tx.send(Ok(content)).await;
            }
        }
    }
}

/// `choices[0].delta.content` of one streamed chunk, if any
fn delta_content(data: &str) -> Option<String> {
    let chunk: serde_json::Value = serde_json::from_str(data).ok()?;
    chunk
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// `error.message` of an error payload sent in place of a chunk
fn upstream_error(data: &str) -> Option<String> {
    let payload: serde_json::Value = serde_json::from_str(data).ok()?;
    let error = payload.get("error")?;
    Some(
        error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}

#[async_trait]
impl ReplySource for OpenAiClient {
    async fn stream_reply(&self, messages: Vec<PromptMessage>) -> Result<BoxStream<'static, Result<String>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = serde_json::json!({
            "model": self.chat_model,
            "messages": messages,
            "stream": true,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(Self::process_sse_stream(response, tx));

        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let payload = serde_json::json!({
            "model": self.embedding_model,
            "input": text,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let body: EmbeddingResponse = response.json().await?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ChatError::Upstream("embedding response had no data".to_string()))
    }
}
