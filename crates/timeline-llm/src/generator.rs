use std::sync::Arc;

use serde_json::{Map, Value};
use timeline_core::host::{ConnectionProfile, ProfileRequest, ProfileService, PromptMessage};
use timeline_core::ReasoningEffort;

use crate::error::{GeneratorError, Result};
use crate::family::ModelFamily;
use crate::reasoning::strip_reasoning_preamble;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
}

impl Prompt {
    pub fn new(system: Option<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.filter(|system| !system.trim().is_empty()),
            user: user.into(),
        }
    }

    pub fn user(user: impl Into<String>) -> Self {
        Self::new(None, user)
    }

    fn into_messages(self) -> Vec<PromptMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system {
            messages.push(PromptMessage::system(system));
        }
        messages.push(PromptMessage::user(self.user));
        messages
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Overrides the budget resolved from the profile's preset.
    pub max_tokens: Option<u32>,
    pub reasoning_effort: ReasoningEffort,
    pub overrides: Map<String, Value>,
}

/// Request-reply over the host's named profiles.
#[derive(Clone)]
pub struct Generator {
    profiles: Arc<dyn ProfileService>,
}

impl Generator {
    pub fn new(profiles: Arc<dyn ProfileService>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &Arc<dyn ProfileService> {
        &self.profiles
    }

    /// Resolves a configured profile id or name against the host's list.
    pub fn resolve_profile(&self, profile: Option<&str>) -> Result<ConnectionProfile> {
        let requested = profile
            .map(str::trim)
            .filter(|profile| !profile.is_empty())
            .ok_or_else(|| GeneratorError::Unavailable("no profile configured".to_string()))?;

        self.profiles
            .find_profile(requested)
            .ok_or_else(|| GeneratorError::Unavailable(format!("profile `{}` not found", requested)))
    }

    /// Completion budget for `profile`: the linked preset's, else the host default.
    pub fn max_tokens_for(&self, profile: &ConnectionProfile) -> u32 {
        profile
            .preset
            .as_deref()
            .and_then(|preset| self.profiles.preset_max_tokens(preset))
            .unwrap_or_else(|| self.profiles.default_max_tokens())
    }

    pub async fn generate(
        &self,
        profile: &str,
        prompt: Prompt,
        options: GenerateOptions,
    ) -> Result<String> {
        let profile = self.resolve_profile(Some(profile))?;
        let max_tokens = options
            .max_tokens
            .unwrap_or_else(|| self.max_tokens_for(&profile));
        let family = ModelFamily::detect(&profile);
        let overrides =
            family.request_parameters(max_tokens, options.reasoning_effort, &options.overrides);

        log::debug!(
            "[generator] profile={} family={:?} max_tokens={}",
            profile.name,
            family,
            max_tokens
        );

        let request = ProfileRequest {
            profile_id: profile.id.clone(),
            messages: prompt.into_messages(),
            max_tokens,
            overrides,
        };

        let text = self
            .profiles
            .send_request(request)
            .await
            .map_err(|source| GeneratorError::Request {
                profile: profile.name.clone(),
                source,
            })?;

        Ok(match &profile.reasoning_template {
            Some(template) => strip_reasoning_preamble(&text, template),
            None => text.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use timeline_core::host::memory::InMemoryHost;
    use timeline_core::host::{PromptRole, ReasoningTemplate};
    use timeline_core::{Conversation, HostError};

    use super::*;

    fn profile(id: &str, model: &str, preset: Option<&str>) -> ConnectionProfile {
        ConnectionProfile {
            id: id.to_string(),
            name: format!("{} profile", id),
            api: Some("openai".to_string()),
            model: Some(model.to_string()),
            preset: preset.map(str::to_string),
            reasoning_template: Some(ReasoningTemplate {
                prefix: "<think>".to_string(),
                suffix: "</think>".to_string(),
            }),
        }
    }

    fn host() -> Arc<InMemoryHost> {
        Arc::new(
            InMemoryHost::new(Conversation::new("c"))
                .with_profiles(vec![
                    profile("main", "gpt-4o", Some("long")),
                    profile("thinker", "o3-mini", None),
                ])
                .with_preset("long", 4000),
        )
    }

    #[tokio::test]
    async fn uses_preset_budget_and_strips_reasoning() {
        let host = host();
        host.push_response("<think>plan</think> The answer.");
        let generator = Generator::new(host.clone());

        let text = generator
            .generate(
                "main",
                Prompt::new(Some("sys".to_string()), "question"),
                GenerateOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(text, "The answer.");
        let request = &host.requests()[0];
        assert_eq!(request.max_tokens, 4000);
        assert_eq!(request.overrides["max_tokens"], 4000);
        assert_eq!(request.messages[0].role, PromptRole::System);
        assert_eq!(request.messages[1].content, "question");
    }

    #[tokio::test]
    async fn reasoning_family_gets_remapped_parameters() {
        let host = host();
        host.push_response("ok");
        let generator = Generator::new(host.clone());

        generator
            .generate(
                "thinker profile",
                Prompt::user("q"),
                GenerateOptions {
                    reasoning_effort: ReasoningEffort::Min,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let request = &host.requests()[0];
        assert_eq!(request.profile_id, "thinker");
        assert_eq!(request.overrides["max_completion_tokens"], 1024);
        assert_eq!(request.overrides["reasoning_effort"], "low");
    }

    #[tokio::test]
    async fn unknown_profile_is_unavailable() {
        let generator = Generator::new(host());
        let err = generator
            .generate("ghost", Prompt::user("q"), GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Unavailable(_)));
        assert!(generator.resolve_profile(None).is_err());
    }

    #[tokio::test]
    async fn remote_failure_keeps_its_cause() {
        let host = host();
        host.push_response_error(HostError::Request {
            profile: "main".to_string(),
            message: "502".to_string(),
        });
        let generator = Generator::new(host);

        let err = generator
            .generate("main", Prompt::user("q"), GenerateOptions::default())
            .await
            .unwrap_err();

        let GeneratorError::Request { source, .. } = err else {
            panic!("expected request error");
        };
        assert!(source.to_string().contains("502"));
    }
}
