//! OpenAI-compatible chat-completions backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::{BackendError, ReasoningBackend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpBackendConfig {
    /// Base URL up to and including the API version segment.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_ms: u64,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key_env: "FORGE_API_KEY".to_string(),
            temperature: 0.1,
            max_tokens: 2_000,
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct HttpBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
    api_key: String,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig, api_key: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| BackendError::Unavailable(format!("http client setup failed: {e}")))?;
        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
        })
    }

    /// Read the API key from `config.api_key_env`.
    pub fn from_env(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let key = std::env::var(&config.api_key_env).map_err(|_| {
            BackendError::Rejected(format!("{} is not set", config.api_key_env))
        })?;
        Self::new(config, key)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

fn classify(err: reqwest::Error, timeout_ms: u64) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout { timeout_ms }
    } else {
        BackendError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl ReasoningBackend for HttpBackend {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn complete(
        &self,
        prompt: &str,
        schema_hint: Option<&str>,
    ) -> Result<String, BackendError> {
        let mut system = String::from(
            "You are the reasoning engine of an agent orchestration system. \
             Answer with a single JSON document and nothing else.",
        );
        if let Some(hint) = schema_hint {
            system.push_str("\nThe JSON must follow this shape:\n");
            system.push_str(hint);
        }

        let mut body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        if schema_hint.is_some() {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(e, self.config.request_timeout_ms))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(BackendError::Unavailable(format!("upstream returned {status}")));
        }
        if !status.is_success() {
            return Err(BackendError::Rejected(format!("upstream returned {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| classify(e, self.config.request_timeout_ms))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::Unavailable("completion had no content".to_string()))?;
        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}
