//! Chat session state machine.
//!
//! The controller owns the UI flags and the token of the one stream it still
//! considers current. Events from any other token are dropped, which is what
//! keeps a late fragment from a superseded stream out of the conversations.

use crate::error::{ChatError, Result};
use crate::events::{Exchange, Message, StreamEvent, StreamToken, TaggedEvent};
use crate::session::ConversationRegistry;
use crate::streaming::StreamHandle;

struct ActiveStream {
    token: StreamToken,
    conversation_id: String,
    handle: Option<StreamHandle>,
}

impl ActiveStream {
    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
    }
}

pub struct ChatController {
    registry: ConversationRegistry,
    is_typing: bool,
    is_waiting: bool,
    next_token: u64,
    current: Option<ActiveStream>,
}

impl ChatController {
    /// Wrap a loaded registry. Without an active conversation the first stored
    /// one is activated, or a new one is created when there are none.
    pub fn new(mut registry: ConversationRegistry) -> Self {
        if registry.active_id().is_none() {
            let first = registry.ids().next().map(str::to_string);
            match first {
                Some(first) => {
                    registry.set_active(&first);
                }
                None => {
                    registry.create_conversation();
                }
            }
        }

        Self {
            registry,
            is_typing: false,
            is_waiting: false,
            next_token: 0,
            current: None,
        }
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing
    }

    pub fn is_waiting(&self) -> bool {
        self.is_waiting
    }

    pub fn active_id(&self) -> Option<&str> {
        self.registry.active_id()
    }

    pub fn messages(&self) -> &[Message] {
        self.registry.active_messages()
    }

    pub fn current_token(&self) -> Option<StreamToken> {
        self.current.as_ref().map(|stream| stream.token)
    }

    pub fn can_send(&self, input: &str) -> bool {
        !self.is_typing && !input.trim().is_empty()
    }

    pub fn can_clear(&self) -> bool {
        !self.is_typing
    }

    pub fn can_switch(&self) -> bool {
        !self.is_typing
    }

    /// Record the user's message and return the exchange the streaming client
    /// should open. Any previous stream is closed first.
    pub fn send(&mut self, input: &str) -> Result<Exchange> {
        if self.is_typing {
            return Err(ChatError::Busy);
        }
        if input.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }

        self.supersede();

        let conversation_id = match self.registry.active_id() {
            Some(id) => id.to_string(),
            None => self.registry.create_conversation(),
        };
        self.registry.append_message(&conversation_id, Message::user(input));

        self.next_token += 1;
        let token = StreamToken(self.next_token);
        self.current = Some(ActiveStream {
            token,
            conversation_id: conversation_id.clone(),
            handle: None,
        });
        self.is_typing = true;
        self.is_waiting = true;

        tracing::info!(%token, conversation_id = %conversation_id, "sending message");

        Ok(Exchange {
            token,
            conversation_id,
            text: input.to_string(),
        })
    }

    /// Hand over the connection opened for `handle.token()`. A handle for a
    /// token that is no longer current is closed immediately.
    pub fn attach(&mut self, handle: StreamHandle) {
        match &mut self.current {
            Some(stream) if stream.token == handle.token() => stream.handle = Some(handle),
            _ => {
                tracing::debug!(token = %handle.token(), "closing handle for superseded stream");
                handle.close();
            }
        }
    }

    /// Apply one stream event. Returns false when the event was discarded
    /// because its stream is no longer current.
    pub fn apply(&mut self, tagged: TaggedEvent) -> bool {
        let conversation_id = match &self.current {
            Some(stream) if stream.token == tagged.token => stream.conversation_id.clone(),
            _ => {
                tracing::debug!(token = %tagged.token, "dropping event from stale stream");
                return false;
            }
        };

        match tagged.event {
            StreamEvent::Fragment(fragment) => {
                if fragment.is_empty() {
                    return true;
                }
                if self.is_waiting {
                    self.is_waiting = false;
                    self.registry
                        .append_message(&conversation_id, Message::assistant(fragment));
                } else {
                    self.registry.append_fragment(&conversation_id, &fragment);
                }
            }
            StreamEvent::Done => {
                tracing::info!(token = %tagged.token, "reply complete");
                self.finish_stream();
                self.registry.persist();
            }
            StreamEvent::Failed(reason) => {
                tracing::warn!(token = %tagged.token, %reason, "reply failed, keeping partial text");
                self.finish_stream();
            }
        }
        true
    }

    /// Start a new conversation, closing any open stream
    pub fn new_conversation(&mut self) -> String {
        self.supersede();
        self.registry.create_conversation()
    }

    /// Switch to `id`. Rejected while a reply is streaming; unknown ids are a no-op.
    pub fn switch_to(&mut self, id: &str) -> Result<bool> {
        if self.is_typing {
            return Err(ChatError::Busy);
        }
        self.supersede();
        Ok(self.registry.set_active(id))
    }

    /// Empty the active conversation. Rejected while a reply is streaming.
    pub fn clear_active(&mut self) -> Result<()> {
        if self.is_typing {
            return Err(ChatError::Busy);
        }
        if let Some(id) = self.registry.active_id().map(str::to_string) {
            self.registry.clear(&id);
        }
        Ok(())
    }

    fn finish_stream(&mut self) {
        if let Some(mut stream) = self.current.take() {
            stream.close();
        }
        self.is_typing = false;
        self.is_waiting = false;
    }

    /// Forget the current stream so its late events are ignored
    fn supersede(&mut self) {
        if let Some(stream) = &self.current {
            tracing::debug!(token = %stream.token, "superseding open stream");
        }
        self.finish_stream();
    }
}
