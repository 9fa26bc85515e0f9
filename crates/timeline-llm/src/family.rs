use serde_json::{Map, Value};
use timeline_core::host::ConnectionProfile;
use timeline_core::ReasoningEffort;

/// API families that disagree on completion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Accepts `max_tokens`, temperature and top-p.
    Standard,
    /// `o1`/`o3`/`o4` reasoning models.
    OSeries,
    /// `gpt-5` reasoning models.
    Gpt5,
}

impl ModelFamily {
    pub fn detect(profile: &ConnectionProfile) -> Self {
        let Some(model) = profile.model.as_deref() else {
            return ModelFamily::Standard;
        };
        let model = model.rsplit('/').next().unwrap_or(model).to_ascii_lowercase();

        if model.starts_with("gpt-5") {
            ModelFamily::Gpt5
        } else if ["o1", "o3", "o4"].iter().any(|prefix| {
            model == *prefix || model.starts_with(&format!("{}-", prefix))
        }) {
            ModelFamily::OSeries
        } else {
            ModelFamily::Standard
        }
    }

    pub fn is_reasoning(self) -> bool {
        !matches!(self, ModelFamily::Standard)
    }

    /// Name of the parameter carrying the completion budget.
    pub fn max_tokens_key(self) -> &'static str {
        if self.is_reasoning() {
            "max_completion_tokens"
        } else {
            "max_tokens"
        }
    }

    /// Value sent as `reasoning_effort`, or `None` to leave it unset.
    pub fn reasoning_effort(self, effort: ReasoningEffort) -> Option<&'static str> {
        if !self.is_reasoning() {
            return None;
        }
        match effort {
            ReasoningEffort::Auto => None,
            ReasoningEffort::Min => Some(match self {
                ModelFamily::Gpt5 => "minimal",
                _ => "low",
            }),
            ReasoningEffort::Low => Some("low"),
            ReasoningEffort::Medium => Some("medium"),
            ReasoningEffort::High | ReasoningEffort::Max => Some("high"),
        }
    }

    /// Builds the provider parameters for one request. Caller overrides are
    /// applied first, then family constraints win.
    pub fn request_parameters(
        self,
        max_tokens: u32,
        effort: ReasoningEffort,
        overrides: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut params = overrides.clone();

        params.remove("max_tokens");
        params.remove("max_completion_tokens");
        params.insert(self.max_tokens_key().to_string(), Value::from(max_tokens));

        if self.is_reasoning() {
            params.remove("temperature");
            params.remove("top_p");
            match self.reasoning_effort(effort) {
                Some(value) => {
                    params.insert("reasoning_effort".to_string(), Value::from(value));
                }
                None => {
                    params.remove("reasoning_effort");
                }
            }
        }

        params
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn profile(model: &str) -> ConnectionProfile {
        ConnectionProfile {
            id: "p".to_string(),
            name: "P".to_string(),
            api: Some("openai".to_string()),
            model: Some(model.to_string()),
            preset: None,
            reasoning_template: None,
        }
    }

    #[test]
    fn detects_families() {
        assert_eq!(ModelFamily::detect(&profile("gpt-4o")), ModelFamily::Standard);
        assert_eq!(ModelFamily::detect(&profile("o3-mini")), ModelFamily::OSeries);
        assert_eq!(ModelFamily::detect(&profile("o1")), ModelFamily::OSeries);
        assert_eq!(ModelFamily::detect(&profile("openai/gpt-5-mini")), ModelFamily::Gpt5);
        assert_eq!(ModelFamily::detect(&profile("omni-large")), ModelFamily::Standard);
    }

    #[test]
    fn standard_family_keeps_sampling_parameters() {
        let overrides = json!({"temperature": 0.7}).as_object().cloned().unwrap();
        let params =
            ModelFamily::Standard.request_parameters(500, ReasoningEffort::High, &overrides);

        assert_eq!(params["max_tokens"], 500);
        assert_eq!(params["temperature"], 0.7);
        assert!(!params.contains_key("reasoning_effort"));
    }

    #[test]
    fn reasoning_family_remaps_budget_and_strips_sampling() {
        let overrides = json!({"temperature": 0.7, "top_p": 0.9, "max_tokens": 10})
            .as_object()
            .cloned()
            .unwrap();
        let params = ModelFamily::OSeries.request_parameters(800, ReasoningEffort::Max, &overrides);

        assert_eq!(params["max_completion_tokens"], 800);
        assert!(!params.contains_key("max_tokens"));
        assert!(!params.contains_key("temperature"));
        assert!(!params.contains_key("top_p"));
        assert_eq!(params["reasoning_effort"], "high");
    }

    #[test]
    fn min_effort_depends_on_family() {
        assert_eq!(ModelFamily::OSeries.reasoning_effort(ReasoningEffort::Min), Some("low"));
        assert_eq!(ModelFamily::Gpt5.reasoning_effort(ReasoningEffort::Min), Some("minimal"));
        assert_eq!(ModelFamily::Gpt5.reasoning_effort(ReasoningEffort::Auto), None);
    }
}
