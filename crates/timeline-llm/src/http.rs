use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use timeline_core::host::{ConnectionProfile, ProfileRequest, ProfileService};
use timeline_core::HostError;

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_MAX_CONTEXT: usize = 8192;

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_max_context() -> usize {
    DEFAULT_MAX_CONTEXT
}

fn default_timeout_secs() -> u64 {
    120
}

/// A profile served by an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProfile {
    #[serde(flatten)]
    pub profile: ConnectionProfile,
    pub base_url: String,
    /// Literal key. Prefer `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl HttpProfile {
    fn api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
        })
    }
}

/// File format for [`HttpProfileService::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProfilesConfig {
    #[serde(default)]
    pub profiles: Vec<HttpProfile>,
    #[serde(default)]
    pub selected: Option<String>,
    /// Preset name to completion budget.
    #[serde(default)]
    pub presets: HashMap<String, u32>,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_max_context")]
    pub max_context: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpProfilesConfig {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            selected: None,
            presets: HashMap::new(),
            default_max_tokens: DEFAULT_MAX_TOKENS,
            max_context: DEFAULT_MAX_CONTEXT,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Non-streaming `/chat/completions` client over a fixed profile list.
pub struct HttpProfileService {
    client: Client,
    config: HttpProfilesConfig,
    selected: RwLock<Option<String>>,
}

impl HttpProfileService {
    pub fn new(config: HttpProfilesConfig) -> Result<Self, HostError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| HostError::Request {
                profile: String::new(),
                message: format!("failed to build HTTP client: {}", err),
            })?;
        let selected = RwLock::new(config.selected.clone());
        Ok(Self {
            client,
            config,
            selected,
        })
    }

    /// Reads a TOML profile list.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| HostError::Request {
            profile: String::new(),
            message: format!("failed to read {}: {}", path.display(), err),
        })?;
        let config: HttpProfilesConfig =
            toml::from_str(&content).map_err(|err| HostError::Request {
                profile: String::new(),
                message: format!("invalid profile file {}: {}", path.display(), err),
            })?;
        Self::new(config)
    }

    /// Changes the selected profile. `None` deselects.
    pub fn select(&self, id: Option<String>) {
        *self.selected.write() = id;
    }

    fn endpoint(&self, profile_id: &str) -> Option<&HttpProfile> {
        self.config
            .profiles
            .iter()
            .find(|entry| entry.profile.id == profile_id)
    }

    fn build_body(profile: &HttpProfile, request: &ProfileRequest) -> Value {
        let mut body = json!({
            "model": profile.profile.model.clone().unwrap_or_default(),
            "messages": request.messages,
            "stream": false,
        });
        if let Some(object) = body.as_object_mut() {
            if !request.overrides.contains_key("max_completion_tokens") {
                object.insert("max_tokens".to_string(), Value::from(request.max_tokens));
            }
            for (key, value) in &request.overrides {
                object.insert(key.clone(), value.clone());
            }
        }
        body
    }
}

fn request_error(profile: &str, message: impl Into<String>) -> HostError {
    HostError::Request {
        profile: profile.to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl ProfileService for HttpProfileService {
    fn profiles(&self) -> Vec<ConnectionProfile> {
        self.config
            .profiles
            .iter()
            .map(|entry| entry.profile.clone())
            .collect()
    }

    fn selected_profile(&self) -> Option<ConnectionProfile> {
        let selected = self.selected.read().clone()?;
        self.find_profile(&selected)
    }

    fn preset_max_tokens(&self, preset: &str) -> Option<u32> {
        self.config.presets.get(preset).copied()
    }

    fn default_max_tokens(&self) -> u32 {
        self.config.default_max_tokens
    }

    fn max_context(&self) -> usize {
        self.config.max_context
    }

    async fn send_request(&self, request: ProfileRequest) -> Result<String, HostError> {
        let profile_id = request.profile_id.as_str();
        let endpoint = self
            .endpoint(profile_id)
            .ok_or_else(|| HostError::UnknownProfile(profile_id.to_string()))?;

        let body = Self::build_body(endpoint, &request);
        let url = format!("{}/chat/completions", endpoint.base_url.trim_end_matches('/'));
        log::debug!("[http] POST {} profile={}", url, endpoint.profile.name);

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = endpoint.api_key() {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|err| request_error(profile_id, err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(request_error(profile_id, format!("HTTP {}: {}", status, text)));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| request_error(profile_id, format!("invalid response body: {}", err)))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| request_error(profile_id, "response has no message content"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::Map;
    use timeline_core::host::PromptMessage;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn service(base_url: &str) -> HttpProfileService {
        HttpProfileService::new(HttpProfilesConfig {
            profiles: vec![HttpProfile {
                profile: ConnectionProfile {
                    id: "local".to_string(),
                    name: "Local".to_string(),
                    api: Some("openai".to_string()),
                    model: Some("gpt-4o-mini".to_string()),
                    preset: None,
                    reasoning_template: None,
                },
                base_url: base_url.to_string(),
                api_key: Some("sk-test".to_string()),
                api_key_env: None,
            }],
            selected: Some("local".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    fn request(overrides: Map<String, Value>) -> ProfileRequest {
        ProfileRequest {
            profile_id: "local".to_string(),
            messages: vec![PromptMessage::user("Hello")],
            max_tokens: 256,
            overrides,
        }
    }

    #[tokio::test]
    async fn posts_chat_completion_and_returns_content() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "stream": false,
                "max_tokens": 256,
                "messages": [{"role": "user", "content": "Hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-test",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hi there"},
                    "finish_reason": "stop"
                }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let service = service(&mock_server.uri());
        let text = service.send_request(request(Map::new())).await.unwrap();

        assert_eq!(text, "Hi there");
        assert_eq!(service.selected_profile().unwrap().name, "Local");
    }

    #[tokio::test]
    async fn reasoning_budget_replaces_max_tokens() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"max_completion_tokens": 900})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&mock_server)
            .await;

        let mut overrides = Map::new();
        overrides.insert("max_completion_tokens".to_string(), json!(900));
        let text = service(&mock_server.uri())
            .send_request(request(overrides))
            .await
            .unwrap();
        assert_eq!(text, "ok");

        let received = mock_server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert!(body.get("max_tokens").is_none());
    }

    #[tokio::test]
    async fn http_failure_is_a_request_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&mock_server)
            .await;

        let err = service(&mock_server.uri())
            .send_request(request(Map::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, HostError::Request { ref message, .. } if message.contains("503")));
    }

    #[tokio::test]
    async fn unknown_profile_is_rejected_without_network() {
        let service = service("http://127.0.0.1:9");
        let mut request = request(Map::new());
        request.profile_id = "missing".to_string();
        assert_eq!(
            service.send_request(request).await.unwrap_err(),
            HostError::UnknownProfile("missing".to_string())
        );
    }

    #[test]
    fn loads_profiles_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
selected = "fast"
max_context = 32000

[presets]
long = 4000

[[profiles]]
id = "fast"
name = "Fast"
model = "gpt-4o-mini"
preset = "long"
base_url = "http://localhost:8080/v1"
api_key_env = "FAST_KEY"
"#
        )
        .unwrap();

        let service = HttpProfileService::load(file.path()).unwrap();

        assert_eq!(service.max_context(), 32000);
        assert_eq!(service.preset_max_tokens("long"), Some(4000));
        assert_eq!(service.selected_profile().unwrap().id, "fast");
        service.select(None);
        assert!(service.selected_profile().is_none());
    }
}
