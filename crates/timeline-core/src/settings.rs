//! Extension configuration.
//!
//! Settings arrive as the host's extension-settings JSON blob, or from a
//! `.toml` / `.json` file when running outside a host. Every field has a
//! default so partial documents load cleanly.
//!
//! Environment overrides:
//! - `TIMELINE_PROFILE`: summarization profile id or name
//! - `TIMELINE_RATE_LIMIT`: requests per minute, 0 for unlimited
//! - `TIMELINE_HIDE_CHAPTERS`: hide sealed chapters (`1`/`true`/`yes`/`on`)
//! - `TIMELINE_CHAPTER_LIMIT`: per-call chapter cap for range queries

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::FillMode;

/// Settings shared by every component of one conversation.
pub type SharedSettings = Arc<RwLock<Settings>>;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid settings TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported settings file extension: {0}")]
    UnsupportedFormat(String),
}

/// Reasoning budget requested from reasoning-capable model families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    #[default]
    Auto,
    Min,
    Low,
    Medium,
    High,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    /// System prompt for every summarization request.
    pub summary_system: String,
    /// Summarizes a chapter that fits in a single chunk. `{{content}}`.
    pub chapter_summary: String,
    /// Summarizes one chunk of a multi-chunk chapter. `{{content}}`.
    pub chunk_summary: String,
    /// Combines chunk summaries into the chapter summary. `{{summaries}}`.
    pub chunk_combine: String,
    pub query_system: String,
    /// `{{timeline}}`, `{{chapter}}`, `{{chapterSummary}}`, `{{query}}`.
    pub query: String,
    pub fill_plan_system: String,
    /// `{{timeline}}`, `{{recent}}`, `{{maxQueries}}`.
    pub fill_plan: String,
    /// `{{content}}`, `{{firstMessageId}}`.
    pub arc_analyzer: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            summary_system: "You are a precise narrative archivist for a roleplay between {{user}} and {{char}}. Summaries are factual, past tense, and keep names, places, decisions and unresolved threads.".to_string(),
            chapter_summary: "Summarize the following chapter of the story.\n\n{{content}}".to_string(),
            chunk_summary: "Summarize this part of a longer chapter. Keep every concrete fact.\n\n{{content}}".to_string(),
            chunk_combine: "Combine these partial summaries, given in order, into one chapter summary.\n\n{{summaries}}".to_string(),
            query_system: "You answer questions about past events between {{user}} and {{char}} using only the provided chapter text.".to_string(),
            query: "Timeline:\n{{timeline}}\n\nChapter summary:\n{{chapterSummary}}\n\nChapter text:\n{{chapter}}\n\nQuestion: {{query}}".to_string(),
            fill_plan_system: "You plan lookups into a story timeline. Reply with a JSON array only.".to_string(),
            fill_plan: "Timeline:\n{{timeline}}\n\nRecent messages:\n{{recent}}\n\nPlan at most {{maxQueries}} queries that would help write the next reply. Each item is {\"query\": string, \"chapters\": [int]} or {\"query\": string, \"startChapter\": int, \"endChapter\": int}.".to_string(),
            arc_analyzer: "The messages below start at id {{firstMessageId}}. Split them into narrative arcs. Reply with a JSON array of {\"title\": string, \"summary\": string, \"chapterEnd\": int} where chapterEnd is the id of the last message of the arc.\n\n{{content}}".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillSettings {
    pub mode: FillMode,
    /// Planning profile; falls back to the query profile.
    pub profile: Option<String>,
    pub max_queries: usize,
    /// Number of trailing messages shown to the planner.
    pub context_messages: usize,
}

impl Default for FillSettings {
    fn default() -> Self {
        Self {
            mode: FillMode::Static,
            profile: None,
            max_queries: 5,
            context_messages: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub profile: Option<String>,
    /// User message sent to start the session.
    pub seed_prompt: String,
}

impl SessionSettings {
    fn agentic() -> Self {
        Self {
            profile: None,
            seed_prompt: "Gather the information from earlier chapters that is needed to write the next reply. Use the timeline tools, then call end_information_retrieval with everything relevant.\n\nTimeline:\n{{timeline}}\n\nCurrent chat:\n{{currentChat}}".to_string(),
        }
    }

    fn lore() -> Self {
        Self {
            profile: None,
            seed_prompt: "Review the story so far and keep the lorebook accurate. Use list_entries and edit_entry, then call end_lore_management.\n\nTimeline:\n{{timeline}}".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::agentic()
    }
}

fn default_lore_settings() -> SessionSettings {
    SessionSettings::lore()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Summarization profile.
    pub profile: Option<String>,
    /// Query profile; falls back to `profile`.
    pub query_profile: Option<String>,
    /// Hide a chapter's messages once it is sealed.
    pub hide_chapters: bool,
    /// Generator requests per minute, 0 for unlimited.
    pub rate_limit: u32,
    /// Tokens reserved for instructions when packing chunks.
    pub context_headroom: usize,
    /// Maximum chapters per range query, 0 for unlimited.
    pub chapter_limit: usize,
    /// Overrides the preset's completion budget.
    pub max_tokens: Option<u32>,
    pub reasoning_effort: ReasoningEffort,
    pub prompts: PromptTemplates,
    pub timeline_fill: FillSettings,
    pub agentic: SessionSettings,
    #[serde(default = "default_lore_settings")]
    pub lore: SessionSettings,
    /// Upper bound on waiting for a profile swap to settle.
    pub profile_swap_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: None,
            query_profile: None,
            hide_chapters: true,
            rate_limit: 0,
            context_headroom: 2048,
            chapter_limit: 0,
            max_tokens: None,
            reasoning_effort: ReasoningEffort::Auto,
            prompts: PromptTemplates::default(),
            timeline_fill: FillSettings::default(),
            agentic: SessionSettings::agentic(),
            lore: SessionSettings::lore(),
            profile_swap_timeout_ms: 3000,
        }
    }
}

pub(crate) fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl Settings {
    /// Reads the host's extension-settings blob.
    pub fn from_value(value: serde_json::Value) -> Result<Self, SettingsError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Loads settings from a `.toml` or `.json` file and applies environment
    /// overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut settings: Settings = match extension.as_str() {
            "toml" => toml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            other => return Err(SettingsError::UnsupportedFormat(other.to_string())),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `TIMELINE_*` overrides from an arbitrary lookup. Unparseable
    /// numbers are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(profile) = lookup("TIMELINE_PROFILE") {
            let profile = profile.trim();
            self.profile = (!profile.is_empty()).then(|| profile.to_string());
        }
        if let Some(rate) = lookup("TIMELINE_RATE_LIMIT").and_then(|v| v.trim().parse().ok()) {
            self.rate_limit = rate;
        }
        if let Some(hide) = lookup("TIMELINE_HIDE_CHAPTERS") {
            self.hide_chapters = parse_bool_env(&hide);
        }
        if let Some(limit) = lookup("TIMELINE_CHAPTER_LIMIT").and_then(|v| v.trim().parse().ok()) {
            self.chapter_limit = limit;
        }
    }

    pub fn into_shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    /// Profile used for chapter queries.
    pub fn query_profile(&self) -> Option<&str> {
        self.query_profile.as_deref().or(self.profile.as_deref())
    }

    /// Profile used for static fill planning.
    pub fn fill_profile(&self) -> Option<&str> {
        self.timeline_fill
            .profile
            .as_deref()
            .or_else(|| self.query_profile())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let settings = Settings::from_value(serde_json::json!({
            "profile": "summarizer",
            "timeline_fill": { "max_queries": 2 }
        }))
        .unwrap();

        assert_eq!(settings.profile.as_deref(), Some("summarizer"));
        assert_eq!(settings.timeline_fill.max_queries, 2);
        assert_eq!(settings.timeline_fill.context_messages, 10);
        assert_eq!(settings.profile_swap_timeout_ms, 3000);
        assert!(settings.lore.seed_prompt.contains("end_lore_management"));
    }

    #[test]
    fn loads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "rate_limit = 12\nchapter_limit = 3\nreasoning_effort = \"max\"\n[agentic]\nprofile = \"agent\""
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();

        assert_eq!(settings.rate_limit, 12);
        assert_eq!(settings.chapter_limit, 3);
        assert_eq!(settings.reasoning_effort, ReasoningEffort::Max);
        assert_eq!(settings.agentic.profile.as_deref(), Some("agent"));
    }

    #[test]
    fn rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(matches!(
            Settings::load(file.path()),
            Err(SettingsError::UnsupportedFormat(ext)) if ext == "yaml"
        ));
    }

    #[test]
    fn overrides_apply_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TIMELINE_PROFILE", "fast"),
            ("TIMELINE_RATE_LIMIT", "30"),
            ("TIMELINE_HIDE_CHAPTERS", "off"),
            ("TIMELINE_CHAPTER_LIMIT", "not-a-number"),
        ]);
        let mut settings = Settings::default();
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.profile.as_deref(), Some("fast"));
        assert_eq!(settings.rate_limit, 30);
        assert!(!settings.hide_chapters);
        assert_eq!(settings.chapter_limit, 0);
    }

    #[test]
    fn query_profile_falls_back_to_summary_profile() {
        let settings = Settings {
            profile: Some("main".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.query_profile(), Some("main"));
        assert_eq!(settings.fill_profile(), Some("main"));
    }

    #[test]
    fn parse_bool_env_values() {
        for value in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert!(parse_bool_env(value), "value {value:?} should be true");
        }
        for value in ["0", "false", "no", "off", ""] {
            assert!(!parse_bool_env(value), "value {value:?} should be false");
        }
    }
}
