//! The world-info book bound to the active character.

use std::sync::Arc;

use serde_json::json;
use timeline_core::host::{WorldInfoBook, WorldInfoStore};
use timeline_core::{Host, HostError};

#[derive(Clone)]
pub struct BoundWorld {
    store: Arc<dyn WorldInfoStore>,
    name: String,
}

impl BoundWorld {
    /// `None` when the host has no world-info store or the character has no
    /// world assigned.
    pub fn resolve(host: &Host) -> Option<Self> {
        let store = host.world_info.clone()?;
        let name = host
            .conversation()
            .read()
            .character
            .as_ref()
            .and_then(|card| card.world.clone())
            .filter(|name| !name.trim().is_empty())?;
        Some(Self { store, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn load(&self) -> Result<WorldInfoBook, HostError> {
        self.store.load_world(&self.name).await
    }

    pub async fn save(&self, book: &WorldInfoBook) -> Result<(), HostError> {
        self.store.save_world(&self.name, book).await
    }

    /// The entries as the model sees them, ordered by uid.
    pub async fn entries_json(&self) -> Result<String, HostError> {
        let book = self.load().await?;
        let entries: Vec<_> = book
            .sorted_entries()
            .into_iter()
            .map(|entry| {
                json!({
                    "uid": entry.uid,
                    "comment": entry.comment,
                    "key": entry.key,
                    "keysecondary": entry.keysecondary,
                    "content": entry.content,
                    "constant": entry.constant,
                    "selective": entry.selective,
                    "disable": entry.disable,
                })
            })
            .collect();
        Ok(serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string()))
    }
}
