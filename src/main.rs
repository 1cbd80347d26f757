use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use tidechat::commands;
use tidechat::config::Config;

#[derive(Parser)]
#[command(name = "tidechat")]
#[command(version)]
#[command(about = "Chat with a streaming assistant from your terminal", long_about = None)]
struct Cli {
    /// Path to the config file (defaults to ~/.tidechat/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the chat screen (default)
    Chat {
        /// Backend base URL
        #[arg(long)]
        backend: Option<String>,
    },
    /// Run the chat backend
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
        /// Document used as retrieval context (PDF or plain text)
        #[arg(long)]
        context: Option<PathBuf>,
    },
    /// List all conversations
    List,
    /// Print one conversation
    Show { id: String },
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// The chat screen owns the terminal, so its logs go to a file
fn init_file_logging(config: &Config) -> Result<()> {
    fs::create_dir_all(&config.client.data_dir).context("Failed to create data directory")?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_path())
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Chat { backend: None }) {
        Commands::Chat { backend } => {
            if let Some(backend) = backend {
                config.client.backend_url = backend;
            }
            init_file_logging(&config)?;
            tidechat::ui::run(&config).await
        }
        Commands::Serve { bind, context } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(context) = context {
                config.server.context_document = Some(context);
            }
            init_stderr_logging();
            commands::serve(&config).await
        }
        Commands::List => {
            init_stderr_logging();
            commands::list_conversations(&config)
        }
        Commands::Show { id } => {
            init_stderr_logging();
            commands::show_conversation(&config, &id)
        }
    }
}
