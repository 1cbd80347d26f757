use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;

use crate::config::Config;
use crate::events::Sender;
use crate::server::knowledge::{KnowledgeBase, NoEmbedder, SharedEmbedder};
use crate::server::openai::OpenAiClient;
use crate::server::{self, BackendState, ChatSettings};
use crate::session::ConversationRegistry;
use crate::storage::FileStore;

fn open_registry(config: &Config) -> Result<ConversationRegistry> {
    let store = FileStore::open(config.store_path()).context("Failed to open conversation store")?;
    Ok(ConversationRegistry::load(Box::new(store)))
}

pub fn list_conversations(config: &Config) -> Result<()> {
    let registry = open_registry(config)?;

    if registry.is_empty() {
        println!("No conversations yet. Run 'tidechat' to start chatting!");
        return Ok(());
    }

    println!("💬 Your conversations:");
    println!("{}", "=".repeat(50));

    for id in registry.ids() {
        let marker = if registry.active_id() == Some(id) { "▶" } else { " " };
        println!("{} {}", marker, registry.title_for(id));
        println!("   🆔 {}", id);
        println!("   ✉️  {} messages", registry.messages(id).len());
        println!();
    }

    Ok(())
}

pub fn show_conversation(config: &Config, id: &str) -> Result<()> {
    let registry = open_registry(config)?;

    if !registry.contains(id) {
        println!("❌ Conversation '{}' not found.", id);
        println!("Run 'tidechat list' to see available conversations.");
        return Ok(());
    }

    println!("💬 {}", registry.title_for(id));
    println!("{}", "=".repeat(50));
    for message in registry.messages(id) {
        let icon = match message.sender {
            Sender::User => "👤",
            Sender::Assistant => "🤖",
        };
        println!("{} {}: {}", icon, message.sender.display_name(), message.text);
        println!();
    }

    Ok(())
}

/// Build the backend from config and serve until interrupted
pub async fn serve(config: &Config) -> Result<()> {
    let settings = &config.server;
    let addr: SocketAddr = settings
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", settings.bind))?;

    let api_key = settings.get_api_key().with_context(|| {
        format!(
            "No API key configured. Set {} or server.api_key in the config file.",
            settings.api_key_env
        )
    })?;

    let openai = Arc::new(
        OpenAiClient::new(
            settings.api_base_url.clone(),
            api_key,
            settings.chat_model.clone(),
            settings.embedding_model.clone(),
        )
        .context("Failed to create HTTP client")?,
    );

    let (knowledge, embedder): (KnowledgeBase, SharedEmbedder) = match &settings.context_document {
        Some(document) => {
            let knowledge = KnowledgeBase::load_or_build(
                document,
                &settings.embeddings_cache,
                openai.as_ref(),
                settings.chunk_size,
                settings.chunk_overlap,
            )
            .await
            .with_context(|| format!("Failed to load context from {}", document.display()))?;
            tracing::info!(chunks = knowledge.len(), "context loaded");
            (knowledge, openai.clone() as SharedEmbedder)
        }
        None => {
            tracing::info!("no context document configured, retrieval disabled");
            (KnowledgeBase::empty(), Arc::new(NoEmbedder) as SharedEmbedder)
        }
    };

    let state = BackendState::new(
        openai,
        embedder,
        knowledge,
        ChatSettings {
            system_prompt: settings.system_prompt.clone(),
            top_k: settings.top_k,
            typing_delay: Duration::from_millis(settings.typing_delay_ms),
        },
    );

    server::serve(addr, state).await?;
    Ok(())
}
