use serde::{Deserialize, Serialize};
use std::fmt;

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn display_name(&self) -> &'static str {
        match self {
            Sender::User => "You",
            Sender::Assistant => "Assistant",
        }
    }
}

/// A single chat message, stored exactly as `{"sender": ..., "text": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Assistant,
            text: text.into(),
        }
    }
}

/// Identifies one opened stream. Tokens are never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamToken(pub u64);

impl fmt::Display for StreamToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Events emitted by a reply stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Literal text fragment to append
    Fragment(String),
    /// The `[DONE]` sentinel arrived
    Done,
    /// The connection failed or ended early
    Failed(String),
}

/// A stream event together with the token of the stream that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub token: StreamToken,
    pub event: StreamEvent,
}

impl TaggedEvent {
    pub fn new(token: StreamToken, event: StreamEvent) -> Self {
        Self { token, event }
    }
}

/// One outgoing user message, handed from the controller to the streaming client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub token: StreamToken,
    pub conversation_id: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_with_lowercase_sender() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"sender":"assistant","text":"hi"}"#);

        let parsed: Message = serde_json::from_str(r#"{"sender":"user","text":"yo"}"#).unwrap();
        assert_eq!(parsed, Message::user("yo"));
    }
}
