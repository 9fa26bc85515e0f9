//! Typed access to per-conversation metadata.
//!
//! Reads go against the in-memory conversation; writes update the mirror and
//! route persistence through the host's save hooks. The store never
//! serializes the chat itself.

use std::sync::Arc;

use serde_json::Value;

use crate::error::StoreError;
use crate::host::{ChatHost, SharedConversation};
use crate::model::{Chapter, ChatMessage, SessionCheckpoint, SessionKind};

pub const TIMELINE_KEY: &str = "timeline";

#[derive(Clone)]
pub struct Store {
    chat: Arc<dyn ChatHost>,
}

impl Store {
    pub fn new(chat: Arc<dyn ChatHost>) -> Self {
        Self { chat }
    }

    pub fn conversation(&self) -> SharedConversation {
        self.chat.conversation()
    }

    pub fn chat_id(&self) -> String {
        self.chat.conversation().read().chat_id.clone()
    }

    pub fn message_count(&self) -> usize {
        self.chat.conversation().read().messages.len()
    }

    pub fn with_messages<R>(&self, f: impl FnOnce(&[ChatMessage]) -> R) -> R {
        let conversation = self.chat.conversation();
        let guard = conversation.read();
        f(&guard.messages)
    }

    /// Mutates messages in place. Callers persist with [`Store::save_conversation`].
    pub fn with_messages_mut<R>(&self, f: impl FnOnce(&mut Vec<ChatMessage>) -> R) -> R {
        let conversation = self.chat.conversation();
        let mut guard = conversation.write();
        f(&mut guard.messages)
    }

    pub fn raw(&self, key: &str) -> Option<Value> {
        self.chat.conversation().read().metadata.get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, value: Value) {
        self.chat
            .conversation()
            .write()
            .metadata
            .insert(key.to_string(), value);
        self.chat.save_metadata_debounced();
    }

    pub fn remove_raw(&self, key: &str) -> Option<Value> {
        let removed = self.chat.conversation().write().metadata.remove(key);
        if removed.is_some() {
            self.chat.save_metadata_debounced();
        }
        removed
    }

    pub fn raw_timeline(&self) -> Option<Value> {
        self.raw(TIMELINE_KEY)
    }

    /// Loads the structured timeline. A missing or null entry is an empty
    /// timeline; the legacy text format must be migrated first.
    pub fn load_timeline(&self) -> Result<Vec<Chapter>, StoreError> {
        match self.raw_timeline() {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(Vec::new()),
            Some(Value::String(_)) => Err(StoreError::LegacyTimeline),
            Some(value) => serde_json::from_value(value).map_err(|source| StoreError::Malformed {
                key: TIMELINE_KEY.to_string(),
                source,
            }),
        }
    }

    pub fn save_timeline(&self, chapters: &[Chapter]) -> Result<(), StoreError> {
        let value = serde_json::to_value(chapters).map_err(|source| StoreError::Serialize {
            key: TIMELINE_KEY.to_string(),
            source,
        })?;
        self.put_raw(TIMELINE_KEY, value);
        Ok(())
    }

    pub fn get_checkpoint(&self, kind: SessionKind) -> Result<Option<SessionCheckpoint>, StoreError> {
        match self.raw(kind.metadata_key()) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Malformed {
                    key: kind.metadata_key().to_string(),
                    source,
                }),
        }
    }

    pub fn put_checkpoint(
        &self,
        kind: SessionKind,
        checkpoint: &SessionCheckpoint,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(checkpoint).map_err(|source| StoreError::Serialize {
            key: kind.metadata_key().to_string(),
            source,
        })?;
        self.put_raw(kind.metadata_key(), value);
        Ok(())
    }

    /// Returns whether a checkpoint was present.
    pub fn delete_checkpoint(&self, kind: SessionKind) -> bool {
        self.remove_raw(kind.metadata_key()).is_some()
    }

    pub async fn save_conversation(&self) -> Result<(), StoreError> {
        Ok(self.chat.save_conversation().await?)
    }

    pub async fn reload_conversation(&self) -> Result<(), StoreError> {
        Ok(self.chat.reload_conversation().await?)
    }

    pub async fn create_backup(&self) -> Result<(), StoreError> {
        Ok(self.chat.create_backup().await?)
    }
}
