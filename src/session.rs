use std::collections::BTreeMap;

use uuid::Uuid;

use crate::events::{Message, Sender};
use crate::storage::{KeyValueStore, ACTIVE_CONVERSATION_KEY, CONVERSATIONS_KEY};

/// Number of characters of the first user message shown as a conversation title
pub const TITLE_LENGTH: usize = 20;
/// Title of a conversation without any user message yet
pub const DEFAULT_TITLE: &str = "New Chat";

pub type Conversations = BTreeMap<String, Vec<Message>>;

/// In-memory conversations plus the active pointer, written through to a
/// [`KeyValueStore`] on every mutation.
///
/// Persistence failures are logged and otherwise ignored: the in-memory state
/// stays authoritative.
pub struct ConversationRegistry {
    store: Box<dyn KeyValueStore>,
    conversations: Conversations,
    active: Option<String>,
}

impl ConversationRegistry {
    /// Load the registry from `store`. Missing, empty or unparseable values are
    /// treated as "no data yet".
    pub fn load(store: Box<dyn KeyValueStore>) -> Self {
        let conversations = match store.get(CONVERSATIONS_KEY) {
            Ok(Some(raw)) if !raw.trim().is_empty() => {
                serde_json::from_str::<Conversations>(&raw).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "stored conversations are unreadable, starting empty");
                    Conversations::new()
                })
            }
            Ok(_) => Conversations::new(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stored conversations");
                Conversations::new()
            }
        };

        let active = match store.get(ACTIVE_CONVERSATION_KEY) {
            Ok(value) => value.filter(|id| conversations.contains_key(id)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read active conversation");
                None
            }
        };

        tracing::debug!(count = conversations.len(), active = ?active, "loaded conversations");

        Self {
            store,
            conversations,
            active,
        }
    }

    /// Create an empty conversation and make it active
    pub fn create_conversation(&mut self) -> String {
        let id = Uuid::new_v4().to_string();
        self.conversations.insert(id.clone(), Vec::new());
        self.active = Some(id.clone());
        self.persist();
        id
    }

    /// Switch the active conversation. Unknown ids are ignored.
    pub fn set_active(&mut self, id: &str) -> bool {
        if !self.conversations.contains_key(id) {
            tracing::debug!(id, "ignoring switch to unknown conversation");
            return false;
        }
        self.active = Some(id.to_string());
        self.persist();
        true
    }

    /// Append a message. A stale id recreates the entry.
    pub fn append_message(&mut self, id: &str, message: Message) {
        self.conversations
            .entry(id.to_string())
            .or_default()
            .push(message);
        self.persist();
    }

    /// Append streamed text to the trailing assistant message of `id`, or start
    /// a new assistant message when the tail is not one.
    pub fn append_fragment(&mut self, id: &str, fragment: &str) {
        let messages = self.conversations.entry(id.to_string()).or_default();
        match messages.last_mut() {
            Some(last) if last.sender == Sender::Assistant => last.text.push_str(fragment),
            _ => messages.push(Message::assistant(fragment)),
        }
        self.persist();
    }

    /// Replace the conversation's messages with an empty sequence
    pub fn clear(&mut self, id: &str) {
        self.conversations.insert(id.to_string(), Vec::new());
        self.persist();
    }

    /// First user message truncated to [`TITLE_LENGTH`] characters, or [`DEFAULT_TITLE`]
    pub fn title_for(&self, id: &str) -> String {
        self.conversations
            .get(id)
            .and_then(|messages| messages.iter().find(|m| m.sender == Sender::User))
            .map(|m| m.text.chars().take(TITLE_LENGTH).collect())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.conversations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.conversations.contains_key(id)
    }

    pub fn messages(&self, id: &str) -> &[Message] {
        self.conversations
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_messages(&self) -> &[Message] {
        match &self.active {
            Some(id) => self.messages(id),
            None => &[],
        }
    }

    /// Write the whole snapshot back to the store
    pub fn persist(&mut self) {
        let snapshot = match serde_json::to_string(&self.conversations) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize conversations");
                return;
            }
        };

        if let Err(e) = self.store.set(CONVERSATIONS_KEY, &snapshot) {
            tracing::warn!(error = %e, "failed to persist conversations");
        }

        if let Some(active) = &self.active {
            if let Err(e) = self.store.set(ACTIVE_CONVERSATION_KEY, active) {
                tracing::warn!(error = %e, "failed to persist active conversation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChatError, Result};
    use crate::storage::MemoryStore;

    fn registry() -> (ConversationRegistry, MemoryStore) {
        let store = MemoryStore::new();
        (ConversationRegistry::load(Box::new(store.clone())), store)
    }

    fn persisted(store: &MemoryStore) -> Conversations {
        let raw = store.get(CONVERSATIONS_KEY).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<()> {
            Err(ChatError::Storage("quota exceeded".to_string()))
        }
    }

    #[test]
    fn new_conversation_is_empty_unique_and_active() {
        let (mut registry, store) = registry();
        let first = registry.create_conversation();
        let second = registry.create_conversation();

        assert_ne!(first, second);
        assert_eq!(registry.active_id(), Some(second.as_str()));
        assert!(registry.messages(&second).is_empty());
        assert_eq!(store.get(ACTIVE_CONVERSATION_KEY).unwrap(), Some(second.clone()));
        assert_eq!(persisted(&store).len(), 2);
    }

    #[test]
    fn appends_keep_call_order() {
        let (mut registry, _) = registry();
        let id = registry.create_conversation();
        let texts = ["one", "two", "three", "four"];
        for (i, text) in texts.iter().enumerate() {
            let message = if i % 2 == 0 {
                Message::user(*text)
            } else {
                Message::assistant(*text)
            };
            registry.append_message(&id, message);
        }

        let stored: Vec<&str> = registry.messages(&id).iter().map(|m| m.text.as_str()).collect();
        assert_eq!(stored, texts);
    }

    #[test]
    fn title_uses_first_user_message_prefix() {
        let (mut registry, _) = registry();
        let id = registry.create_conversation();
        assert_eq!(registry.title_for(&id), "New Chat");

        registry.append_message(&id, Message::assistant("Welcome"));
        assert_eq!(registry.title_for(&id), "New Chat");

        registry.append_message(&id, Message::user("Hello there, how are you today?"));
        assert_eq!(registry.title_for(&id), "Hello there, how are");

        registry.append_message(&id, Message::user("Second question"));
        assert_eq!(registry.title_for(&id), "Hello there, how are");
    }

    #[test]
    fn title_counts_characters_not_bytes() {
        let (mut registry, _) = registry();
        let id = registry.create_conversation();
        registry.append_message(&id, Message::user("ééééééééééééééééééééééé"));
        assert_eq!(registry.title_for(&id).chars().count(), TITLE_LENGTH);
    }

    #[test]
    fn clear_only_touches_one_conversation() {
        let (mut registry, store) = registry();
        let kept = registry.create_conversation();
        registry.append_message(&kept, Message::user("keep me"));
        let cleared = registry.create_conversation();
        registry.append_message(&cleared, Message::user("drop me"));

        registry.clear(&cleared);

        let snapshot = persisted(&store);
        assert!(snapshot[&cleared].is_empty());
        assert_eq!(snapshot[&kept], vec![Message::user("keep me")]);
    }

    #[test]
    fn switching_to_unknown_id_is_ignored() {
        let (mut registry, _) = registry();
        let id = registry.create_conversation();
        assert!(!registry.set_active("missing"));
        assert_eq!(registry.active_id(), Some(id.as_str()));
    }

    #[test]
    fn stale_id_append_recreates_entry() {
        let (mut registry, _) = registry();
        registry.append_message("gone", Message::user("hi"));
        assert_eq!(registry.messages("gone"), &[Message::user("hi")]);
    }

    #[test]
    fn fragments_extend_trailing_assistant_message() {
        let (mut registry, _) = registry();
        let id = registry.create_conversation();
        registry.append_message(&id, Message::user("Hi"));
        registry.append_fragment(&id, "Hel");
        registry.append_fragment(&id, "lo");

        assert_eq!(
            registry.messages(&id),
            &[Message::user("Hi"), Message::assistant("Hello")]
        );
    }

    #[test]
    fn reload_restores_snapshot_and_active() {
        let store = MemoryStore::new();
        let id = {
            let mut registry = ConversationRegistry::load(Box::new(store.clone()));
            let id = registry.create_conversation();
            registry.append_message(&id, Message::user("persist me"));
            id
        };

        let registry = ConversationRegistry::load(Box::new(store));
        assert_eq!(registry.active_id(), Some(id.as_str()));
        assert_eq!(registry.active_messages(), &[Message::user("persist me")]);
    }

    #[test]
    fn load_tolerates_garbage_and_dangling_active() {
        let mut store = MemoryStore::new();
        store.set(CONVERSATIONS_KEY, "{broken").unwrap();
        store.set(ACTIVE_CONVERSATION_KEY, "nowhere").unwrap();

        let registry = ConversationRegistry::load(Box::new(store));
        assert!(registry.is_empty());
        assert_eq!(registry.active_id(), None);
    }

    #[test]
    fn failed_writes_keep_memory_state() {
        let mut registry = ConversationRegistry::load(Box::new(FailingStore));
        let id = registry.create_conversation();
        registry.append_message(&id, Message::user("still here"));
        assert_eq!(registry.active_messages(), &[Message::user("still here")]);
    }
}
