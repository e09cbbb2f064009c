//! `OpenAI` Chat Completions client.

use super::anthropic::error_kind;
use super::{LlmHttpConfig, LlmProvider, build_http_client};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// `OpenAI` client.
pub struct OpenAiClient {
    api_key: Option<SecretString>,
    endpoint: String,
    model: String,
    max_tokens: u32,
    client: reqwest::blocking::Client,
}

impl OpenAiClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Default response token limit.
    pub const DEFAULT_MAX_TOKENS: u32 = 4096;

    /// Creates a client with no key configured.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: None,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            client: build_http_client(LlmHttpConfig::default()),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(self, key: impl Into<String>) -> Self {
        self.with_secret_key(SecretString::from(key.into()))
    }

    /// Sets the API key from a secret.
    #[must_use]
    pub fn with_secret_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the response token limit.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets HTTP client timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    /// Checks if the model is a GPT-5 family or reasoning model.
    ///
    /// These use `max_completion_tokens` instead of `max_tokens` and only
    /// support the default temperature.
    fn is_gpt5_model(&self) -> bool {
        self.model.starts_with("gpt-5")
            || self.model.starts_with("o1")
            || self.model.starts_with("o3")
    }

    fn build_request<'a>(&'a self, messages: Vec<ChatMessage<'a>>) -> ChatCompletionRequest<'a> {
        if self.is_gpt5_model() {
            ChatCompletionRequest {
                model: &self.model,
                messages,
                max_tokens: None,
                max_completion_tokens: Some(self.max_tokens),
                temperature: None,
                response_format: Some(ResponseFormat::JSON_OBJECT),
            }
        } else {
            ChatCompletionRequest {
                model: &self.model,
                messages,
                max_tokens: Some(self.max_tokens),
                max_completion_tokens: None,
                temperature: Some(0.7),
                response_format: Some(ResponseFormat::JSON_OBJECT),
            }
        }
    }

    fn request(&self, messages: Vec<ChatMessage<'_>>) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .ok_or_else(|| Error::provider("openai: OPENAI_API_KEY not set"))?;

        tracing::debug!(provider = "openai", model = %self.model, "Making LLM request");

        let request = self.build_request(messages);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| {
                let error_kind = error_kind(&e);
                tracing::error!(
                    provider = "openai",
                    model = %self.model,
                    error = %e,
                    error_kind = error_kind,
                    "LLM request failed"
                );
                Error::provider(format!("openai: {error_kind} error: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            tracing::error!(
                provider = "openai",
                model = %self.model,
                status = %status,
                "LLM API returned error status"
            );
            return Err(Error::provider(format!(
                "openai: API returned status: {status} - {body}"
            )));
        }

        let response: ChatCompletionResponse = response
            .json()
            .map_err(|e| Error::provider(format!("openai: undecodable response: {e}")))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::provider("openai: no content in response"))
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvider for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.request(vec![ChatMessage {
            role: "user",
            content: prompt,
        }])
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.request(vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ])
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

impl ResponseFormat {
    const JSON_OBJECT: Self = Self {
        format_type: "json_object",
    };
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_configuration() {
        let client = OpenAiClient::new()
            .with_api_key("sk-test")
            .with_endpoint("https://proxy.local/v1/")
            .with_model("gpt-4-turbo");

        assert_eq!(client.name(), "openai");
        assert_eq!(client.endpoint, "https://proxy.local/v1");
        assert_eq!(client.model, "gpt-4-turbo");
    }

    #[test]
    fn test_missing_key_is_provider_failure() {
        let err = OpenAiClient::new().complete("hi").unwrap_err();
        assert!(matches!(err, Error::GenerationFailure { .. }));
    }

    #[test]
    fn test_gpt5_uses_completion_tokens() {
        let client = OpenAiClient::new().with_model("gpt-5-mini").with_max_tokens(500);
        let request = client.build_request(vec![]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["max_completion_tokens"], 500);
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_chat_model_uses_max_tokens() {
        let client = OpenAiClient::new();
        let request = client.build_request(vec![ChatMessage {
            role: "system",
            content: "s",
        }]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["max_tokens"], OpenAiClient::DEFAULT_MAX_TOKENS);
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["role"], "system");
    }

    #[test]
    fn test_response_without_content() {
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(response.choices[0].message.content.is_none());
    }
}
