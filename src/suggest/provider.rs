use crate::config::SuggestionSettings;
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You map CRM export columns onto a canonical CRM schema. \
Answer with a JSON array only.";

/// Text-completion backend used for mapping suggestions.
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, prompt: &str) -> AppResult<String>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct HttpCompletionProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpCompletionProvider {
    pub fn new(settings: &SuggestionSettings, api_key: String) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl SuggestionProvider for HttpCompletionProvider {
    fn name(&self) -> &'static str {
        "http-completion"
    }

    async fn complete(&self, prompt: &str) -> AppResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ]
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "completion service returned HTTP {}",
                status.as_u16()
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| AppError::Upstream("completion response had no content".to_string()))
    }
}

/// Stands in when suggestions are turned off or no key is configured.
pub struct DisabledSuggestionProvider {
    reason: String,
}

impl DisabledSuggestionProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SuggestionProvider for DisabledSuggestionProvider {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> AppResult<String> {
        Err(AppError::Upstream(self.reason.clone()))
    }
}

/// Returns a canned response; used by tests and offline demos.
pub struct StaticSuggestionProvider {
    response: Result<String, String>,
}

impl StaticSuggestionProvider {
    pub fn replying(response: impl Into<String>) -> Self {
        Self {
            response: Ok(response.into()),
        }
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            response: Err(error.into()),
        }
    }
}

#[async_trait]
impl SuggestionProvider for StaticSuggestionProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn complete(&self, _prompt: &str) -> AppResult<String> {
        self.response
            .clone()
            .map_err(AppError::Upstream)
    }
}

pub fn provider_from_settings(settings: &SuggestionSettings) -> Arc<dyn SuggestionProvider> {
    if !settings.enabled {
        return Arc::new(DisabledSuggestionProvider::new(
            "mapping suggestions are disabled in settings",
        ));
    }
    let api_key = match std::env::var(&settings.api_key_env) {
        Ok(key) if !key.trim().is_empty() => key,
        _ => {
            return Arc::new(DisabledSuggestionProvider::new(format!(
                "{} is not set",
                settings.api_key_env
            )))
        }
    };
    match HttpCompletionProvider::new(settings, api_key) {
        Ok(provider) => Arc::new(provider),
        Err(error) => {
            tracing::warn!(error = %error, "failed to build completion client");
            Arc::new(DisabledSuggestionProvider::new(error.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{provider_from_settings, StaticSuggestionProvider, SuggestionProvider};
    use crate::config::SuggestionSettings;

    #[tokio::test]
    async fn disabled_settings_produce_failing_provider() {
        let settings = SuggestionSettings {
            enabled: false,
            ..SuggestionSettings::default()
        };
        let provider = provider_from_settings(&settings);
        assert_eq!(provider.name(), "disabled");
        let err = provider.complete("prompt").await.expect_err("disabled");
        assert!(err.to_string().starts_with("UPSTREAM"));
    }

    #[tokio::test]
    async fn missing_key_env_disables_provider() {
        let settings = SuggestionSettings {
            api_key_env: "CRM_MIGRATION_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..SuggestionSettings::default()
        };
        assert_eq!(provider_from_settings(&settings).name(), "disabled");
    }

    #[tokio::test]
    async fn static_provider_replays_response() {
        let provider = StaticSuggestionProvider::replying("[]");
        assert_eq!(provider.complete("anything").await.expect("reply"), "[]");
    }
}
