//! Conversation UI components for the chat screen

pub mod commands;
pub mod composer;
pub mod history;
pub mod manager;
pub mod sidebar;
pub mod streaming;

pub use commands::{get_help_text, parse_slash_command, SlashCommand};
pub use composer::ConversationComposer;
pub use history::ConversationHistory;
pub use manager::ConversationManager;
pub use sidebar::{Sidebar, SidebarEntry};
pub use streaming::StreamingIndicator;
