use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    #[default]
    Static,
    Agentic,
}

/// One answered query, exposed through the `timelineResponses` macro until the
/// next user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineFillResult {
    pub mode: FillMode,
    pub query: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_chapter: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_chapter: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TimelineFillResult {
    pub fn agentic(response: impl Into<String>) -> Self {
        Self {
            mode: FillMode::Agentic,
            query: "Agentic Timeline Fill Session".to_string(),
            response: response.into(),
            start_chapter: None,
            end_chapter: None,
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
