use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HostError;

/// Delimiters of a reasoning preamble the model may emit before its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningTemplate {
    pub prefix: String,
    pub suffix: String,
}

/// A named bundle of model-provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub id: String,
    pub name: String,
    /// API family, e.g. `openai`, `claude`, `openrouter`.
    #[serde(default)]
    pub api: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Linked completion preset.
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub reasoning_template: Option<ReasoningTemplate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }
}

/// A request routed through a named profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRequest {
    pub profile_id: String,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: u32,
    /// Provider parameters merged into the request body.
    pub overrides: Map<String, Value>,
}

/// The host's named-profile request service.
#[async_trait]
pub trait ProfileService: Send + Sync {
    fn profiles(&self) -> Vec<ConnectionProfile>;

    fn selected_profile(&self) -> Option<ConnectionProfile>;

    /// `max_tokens` configured in the named preset.
    fn preset_max_tokens(&self, preset: &str) -> Option<u32>;

    /// Host-wide completion budget used when a profile has no preset.
    fn default_max_tokens(&self) -> u32;

    /// Host-wide context window in tokens.
    fn max_context(&self) -> usize;

    async fn send_request(&self, request: ProfileRequest) -> Result<String, HostError>;

    /// Looks a profile up by id, then by name.
    fn find_profile(&self, id_or_name: &str) -> Option<ConnectionProfile> {
        let profiles = self.profiles();
        profiles
            .iter()
            .find(|profile| profile.id == id_or_name)
            .or_else(|| profiles.iter().find(|profile| profile.name == id_or_name))
            .cloned()
    }
}
