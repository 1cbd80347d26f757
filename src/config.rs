use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat client settings
    pub client: ClientConfig,

    /// Backend settings used by `tidechat serve`
    pub server: ServerConfig,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the backend serving `/chat`
    pub backend_url: String,

    /// Where the conversation store and log file live
    pub data_dir: PathBuf,
}

/// Backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,

    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub api_key_env: String,

    pub chat_model: String,
    pub embedding_model: String,
    pub system_prompt: String,

    /// PDF or plain-text document used for retrieval. Retrieval is off when unset.
    pub context_document: Option<PathBuf>,
    pub embeddings_cache: PathBuf,

    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub typing_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client: ClientConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            backend_url: "http://127.0.0.1:8000".to_string(),
            data_dir: Config::home_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "127.0.0.1:8000".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-large".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
            context_document: None,
            embeddings_cache: Config::home_dir().join("embeddings.json"),
            top_k: 3,
            chunk_size: 1000,
            chunk_overlap: 200,
            typing_delay_ms: 15,
        }
    }
}

impl Config {
    /// `~/.tidechat`
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tidechat")
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Load configuration from `path` (or the default location). A missing
    /// file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        if !config_path.exists() {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))
    }

    /// Save configuration to `path` (or the default location)
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Path of the key-value conversation store
    pub fn store_path(&self) -> PathBuf {
        self.client.data_dir.join("store.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.client.data_dir.join("tidechat.log")
    }
}

impl ServerConfig {
    /// API key from config or environment
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }
}
