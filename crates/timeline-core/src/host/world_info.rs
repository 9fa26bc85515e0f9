use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HostError;

/// A world-info entry: trigger keywords plus the injected content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldInfoEntry {
    pub uid: u64,
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub keysecondary: Vec<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub constant: bool,
    #[serde(default)]
    pub selective: bool,
    #[serde(default)]
    pub disable: bool,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// A named world-info document, entries keyed by uid string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldInfoBook {
    #[serde(default)]
    pub entries: BTreeMap<String, WorldInfoEntry>,
}

impl WorldInfoBook {
    pub fn next_uid(&self) -> u64 {
        self.entries
            .values()
            .map(|entry| entry.uid + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn get(&self, uid: u64) -> Option<&WorldInfoEntry> {
        self.entries.get(&uid.to_string())
    }

    pub fn get_mut(&mut self, uid: u64) -> Option<&mut WorldInfoEntry> {
        self.entries.get_mut(&uid.to_string())
    }

    pub fn insert(&mut self, entry: WorldInfoEntry) {
        self.entries.insert(entry.uid.to_string(), entry);
    }

    pub fn remove(&mut self, uid: u64) -> Option<WorldInfoEntry> {
        self.entries.remove(&uid.to_string())
    }

    /// Entries ordered by uid.
    pub fn sorted_entries(&self) -> Vec<&WorldInfoEntry> {
        let mut entries: Vec<&WorldInfoEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.uid);
        entries
    }
}

#[async_trait]
pub trait WorldInfoStore: Send + Sync {
    async fn load_world(&self, name: &str) -> Result<WorldInfoBook, HostError>;

    /// Persists the whole document.
    async fn save_world(&self, name: &str, book: &WorldInfoBook) -> Result<(), HostError>;
}
