use std::time::Duration;

use async_trait::async_trait;
use crmflow_core::retry::RetryableError;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("language provider responded with HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("language provider timed out")]
    Timeout,
    #[error("language provider transport failure: {0}")]
    Transport(String),
    #[error("language provider returned an unusable reply: {0}")]
    Malformed(String),
}

impl RetryableError for ProviderError {
    /// Timeouts, connection failures, 429 and 5xx are worth another attempt.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Timeout | Self::Transport(_) => true,
            Self::Malformed(_) => false,
        }
    }

    fn timed_out() -> Self {
        Self::Timeout
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends `prompt` and asks for a JSON reply matching `schema`.
    async fn complete(&self, prompt: &str, schema: &Value) -> Result<String, ProviderError>;
}

/// Client for any endpoint that speaks the OpenAI chat completions protocol (OpenAI, Ollama).
#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

impl ChatCompletionsClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ProviderError::Transport(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    fn system_prompt(schema: &Value) -> String {
        format!(
            "You translate CRM requests into JSON. Reply with a single JSON object and nothing \
             else. It must match this JSON schema:\n{schema}"
        )
    }
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(&self, prompt: &str, schema: &Value) -> Result<String, ProviderError> {
        let body = json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": Self::system_prompt(schema)},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.0,
            "response_format": {"type": "json_object"}
        });

        let mut request = self.http.post(format!("{}/chat/completions", self.endpoint)).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status: status.as_u16(), message });
        }

        let payload: ChatResponse =
            response.json().await.map_err(|error| ProviderError::Malformed(error.to_string()))?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Malformed("reply contained no choices".to_string()))
    }
}
