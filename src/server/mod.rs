//! Chat backend: `GET /chat` streams a retrieval-augmented completion as SSE.

pub mod knowledge;
pub mod openai;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{ChatError, Result};
use crate::streaming::DONE_SENTINEL;
use knowledge::{KnowledgeBase, SharedEmbedder};
use openai::{PromptMessage, ReplySource};

/// Prompt and pacing settings for `/chat`
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub system_prompt: String,
    pub top_k: usize,
    pub typing_delay: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".to_string(),
            top_k: 3,
            typing_delay: Duration::from_millis(15),
        }
    }
}

#[derive(Clone)]
pub struct BackendState {
    replies: Arc<dyn ReplySource>,
    embedder: SharedEmbedder,
    knowledge: Arc<KnowledgeBase>,
    settings: Arc<ChatSettings>,
}

impl BackendState {
    pub fn new(
        replies: Arc<dyn ReplySource>,
        embedder: SharedEmbedder,
        knowledge: KnowledgeBase,
        settings: ChatSettings,
    ) -> Self {
        Self {
            replies,
            embedder,
            knowledge: Arc::new(knowledge),
            settings: Arc::new(settings),
        }
    }

    /// Prompt for one user message: persona, retrieved context, the message
    async fn build_prompt(&self, message: &str) -> Vec<PromptMessage> {
        let chunks = self
            .knowledge
            .relevant(message, self.embedder.as_ref(), self.settings.top_k)
            .await;
        let context_text = chunks.join("\n\n");

        vec![
            PromptMessage::system(self.settings.system_prompt.clone()),
            PromptMessage::system(format!(
                "Use the following context from a document to help answer:\n{}",
                context_text
            )),
            PromptMessage::user(message),
        ]
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub conversation_id: String,
    pub message: String,
}

pub fn router(state: BackendState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/chat", get(chat))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: BackendState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "chat backend listening");
    axum::serve(listener, router(state).into_make_service())
        .await
        .map_err(|err| ChatError::Transport(format!("server error: {err}")))?;
    Ok(())
}

async fn chat(
    State(state): State<BackendState>,
    Query(query): Query<ChatQuery>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    tracing::info!(conversation_id = %query.conversation_id, "chat request");

    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(async move {
        let prompt = state.build_prompt(&query.message).await;

        let mut tokens = match state.replies.stream_reply(prompt).await {
            Ok(tokens) => tokens,
            Err(e) => {
                // ending without [DONE] tells the client the exchange failed
                tracing::error!(conversation_id = %query.conversation_id, error = %e, "completion request failed");
                return;
            }
        };

        while let Some(token) = tokens.next().await {
            match token {
                Ok(token) => {
                    tokio::time::sleep(state.settings.typing_delay).await;
                    if tx.send(Event::default().data(normalize_newlines(&token))).await.is_err() {
                        tracing::debug!(conversation_id = %query.conversation_id, "client went away");
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(conversation_id = %query.conversation_id, error = %e, "completion stream failed");
                    return;
                }
            }
        }

        let _ = tx.send(Event::default().data(DONE_SENTINEL)).await;
    });

    Sse::new(ReceiverStream::new(rx).map(Ok)).keep_alive(KeepAlive::default())
}

/// SSE data cannot carry bare CR; fold every line ending into LF
fn normalize_newlines(token: &str) -> String {
    token.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use knowledge::{Chunk, Embedder, NoEmbedder};
    use std::sync::Mutex;

    struct RecordingSource {
        prompts: Mutex<Vec<Vec<PromptMessage>>>,
    }

    #[async_trait]
    impl ReplySource for RecordingSource {
        async fn stream_reply(&self, messages: Vec<PromptMessage>) -> Result<BoxStream<'static, Result<String>>> {
            self.prompts.lock().unwrap().push(messages);
            Ok(futures::stream::empty().boxed())
        }
    }

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn prompt_carries_retrieved_context() {
        let knowledge = KnowledgeBase::new(vec![
            Chunk { text: "Visas take two weeks.".into(), embedding: vec![1.0, 0.0] },
            Chunk { text: "Unrelated.".into(), embedding: vec![0.0, 1.0] },
        ]);
        let state = BackendState::new(
            Arc::new(RecordingSource { prompts: Mutex::new(Vec::new()) }),
            Arc::new(FixedEmbedder),
            knowledge,
            ChatSettings { top_k: 1, ..ChatSettings::default() },
        );

        let prompt = state.build_prompt("How long for a visa?").await;
        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt[0], PromptMessage::system("You are a helpful assistant."));
        assert!(prompt[1].content.ends_with("Visas take two weeks."));
        assert!(!prompt[1].content.contains("Unrelated"));
        assert_eq!(prompt[2], PromptMessage::user("How long for a visa?"));
    }

    #[tokio::test]
    async fn prompt_without_knowledge_has_empty_context() {
        let state = BackendState::new(
            Arc::new(RecordingSource { prompts: Mutex::new(Vec::new()) }),
            Arc::new(NoEmbedder),
            KnowledgeBase::empty(),
            ChatSettings::default(),
        );
        let prompt = state.build_prompt("hi").await;
        assert!(prompt[1].content.ends_with("answer:\n"));
    }

    #[test]
    fn carriage_returns_become_newlines() {
        assert_eq!(normalize_newlines("a\r\nb\rc"), "a\nb\nc");
    }
}
