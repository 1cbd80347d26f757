//! Terminal chat client that streams assistant replies over Server-Sent Events
//! and keeps conversation history in a local key-value store, plus the small
//! retrieval backend it talks to.

pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod server;
pub mod session;
pub mod storage;
pub mod streaming;
pub mod ui;

pub use controller::ChatController;
pub use error::{ChatError, Result};
pub use events::{Exchange, Message, Sender, StreamEvent, StreamToken, TaggedEvent};
pub use session::ConversationRegistry;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use streaming::{SseDecoder, StreamClient, StreamHandle};
