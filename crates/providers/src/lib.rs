//! Language-model provider client for Agentry.
//!
//! One implementation covers every supported provider tag, since all of
//! them (OpenAI, LM Studio, Ollama, custom gateways) expose an
//! OpenAI-compatible `/chat/completions` endpoint.
//!
//! The `ask` contract is deliberately infallible: transport errors, bad
//! statuses, and unparseable bodies are classified, logged, and turned
//! into an error-prefixed text answer. Callers inspect answer text, not
//! error types.

use agentry_core::error::ProviderError;
use agentry_core::llm::{AskOptions, Exchange, LLM_ERROR_PREFIX, LanguageModel};
use agentry_core::model::{LlmDefinition, ProviderKind};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// HTTP client for every configured language-model definition.
///
/// Stateless per call: the definition supplies provider tag, base
/// address, credential, and sampling defaults, so one client instance
/// serves all stored definitions.
pub struct LlmClient {
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(timeout: std::time::Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Resolve the chat-completions URL for a definition.
    fn base_url(definition: &LlmDefinition) -> Result<String, ProviderError> {
        let base = match (&definition.base_url, definition.provider) {
            (Some(url), _) if !url.is_empty() => url.clone(),
            (_, ProviderKind::Openai) => "https://api.openai.com/v1".to_string(),
            (_, ProviderKind::Lmstudio) => "http://localhost:1234/v1".to_string(),
            (_, ProviderKind::Ollama) => "http://localhost:11434/v1".to_string(),
            (_, ProviderKind::Custom) => {
                return Err(ProviderError::MalformedResponse(
                    "custom provider requires a base_url".into(),
                ));
            }
        };
        Ok(format!("{}/chat/completions", base.trim_end_matches('/')))
    }

    fn to_api_messages(prompt: &str, history: &[Exchange]) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(history.len() * 2 + 1);
        for exchange in history {
            messages.push(ApiMessage {
                role: "user".into(),
                content: Some(exchange.question.clone()),
            });
            messages.push(ApiMessage {
                role: "assistant".into(),
                content: Some(exchange.answer.clone()),
            });
        }
        messages.push(ApiMessage {
            role: "user".into(),
            content: Some(prompt.to_string()),
        });
        messages
    }

    async fn complete(
        &self,
        definition: &LlmDefinition,
        prompt: &str,
        history: &[Exchange],
        options: AskOptions,
    ) -> Result<String, ProviderError> {
        let url = Self::base_url(definition)?;
        let temperature = options.temperature.unwrap_or(definition.temperature);
        let max_tokens = options.max_tokens.unwrap_or(definition.max_tokens);

        let body = serde_json::json!({
            "model": definition.model_name,
            "messages": Self::to_api_messages(prompt, history),
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": false,
        });

        debug!(
            provider = definition.provider.as_str(),
            model = %definition.model_name,
            temperature,
            "Sending completion request"
        );

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &definition.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited);
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        let choice = api_response.choices.into_iter().next().ok_or_else(|| {
            ProviderError::MalformedResponse("No choices in response".into())
        })?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn ask(
        &self,
        definition: &LlmDefinition,
        prompt: &str,
        history: &[Exchange],
        options: AskOptions,
    ) -> String {
        match self.complete(definition, prompt, history, options).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(
                    llm = %definition.name,
                    provider = definition.provider.as_str(),
                    error = %err,
                    "LLM call failed"
                );
                format!("{LLM_ERROR_PREFIX} {err}")
            }
        }
    }
}

// --- OpenAI-compatible API types (internal) ---

#[derive(Debug, serde::Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    /// Always set on outbound messages; assistant replies may carry none.
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}
