//! Generation provider abstraction.
//!
//! Content is produced by a text generation model treated as a black box that
//! takes a system and user prompt and returns text. Clients exist for Anthropic
//! and `OpenAI`; [`ResilientLlmProvider`] wraps either with timeout retries and a
//! circuit breaker.

mod anthropic;
mod openai;
mod resilience;
mod response_shape;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;
pub use resilience::{LlmResilienceConfig, ResilientLlmProvider};
pub use response_shape::ResponseShape;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::{Error, GenerationStage, Result};
use std::sync::Arc;
use std::time::Duration;

/// Trait for generation providers.
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    fn complete(&self, prompt: &str) -> Result<String>;

    /// Generates a completion with a system prompt.
    ///
    /// Default implementation concatenates system and user prompts.
    /// Providers should override this to use native system prompt support.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        let combined = format!("{system}\n\n---\n\nUser message:\n{user}");
        self.complete(&combined)
    }
}

impl<T: LlmProvider + ?Sized> LlmProvider for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt)
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        (**self).complete_with_system(system, user)
    }
}

/// HTTP client configuration for providers.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Loads HTTP configuration from config file settings.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut settings = Self::default();
        if let Some(timeout_ms) = config.timeout_ms {
            settings.timeout_ms = timeout_ms;
        }
        if let Some(connect_timeout_ms) = config.connect_timeout_ms {
            settings.connect_timeout_ms = connect_timeout_ms;
        }
        settings
    }
}

/// Builds a blocking HTTP client with configured timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build LLM HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Builds the configured provider, wrapped in [`ResilientLlmProvider`].
///
/// A missing API key is not an error here: commands that never generate still
/// work, and each generation attempt fails with a provider error instead.
///
/// # Errors
///
/// Currently infallible; kept fallible for providers that validate eagerly.
pub fn build_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let http = LlmHttpConfig::from_config(config);
    let resilience = LlmResilienceConfig::from_config(config);
    if config.api_key.is_none() {
        tracing::warn!(
            provider = config.provider.as_str(),
            env = config.provider.api_key_env(),
            "no API key configured, generation requests will fail"
        );
    }

    let provider: Arc<dyn LlmProvider> = match config.provider {
        LlmProviderKind::Anthropic => {
            let mut client = AnthropicClient::new().with_http_config(http);
            if let Some(ref key) = config.api_key {
                client = client.with_secret_key(key.clone());
            }
            if let Some(ref model) = config.model {
                client = client.with_model(model);
            }
            if let Some(ref base_url) = config.base_url {
                client = client.with_endpoint(base_url);
            }
            if let Some(max_tokens) = config.max_tokens {
                client = client.with_max_tokens(max_tokens);
            }
            Arc::new(ResilientLlmProvider::new(client, resilience))
        },
        LlmProviderKind::OpenAi => {
            let mut client = OpenAiClient::new().with_http_config(http);
            if let Some(ref key) = config.api_key {
                client = client.with_secret_key(key.clone());
            }
            if let Some(ref model) = config.model {
                client = client.with_model(model);
            }
            if let Some(ref base_url) = config.base_url {
                client = client.with_endpoint(base_url);
            }
            if let Some(max_tokens) = config.max_tokens {
                client = client.with_max_tokens(max_tokens);
            }
            Arc::new(ResilientLlmProvider::new(client, resilience))
        },
    };
    tracing::info!(provider = provider.name(), "generation provider ready");
    Ok(provider)
}

/// Extracts JSON from a provider response, handling markdown code blocks and
/// leading or trailing prose.
#[must_use]
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    // ```json ... ```
    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // ``` ... ``` with any or no language tag
    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        let after_marker = &trimmed[content_start..];
        let json_start = after_marker
            .find(['{', '['])
            .map_or(content_start, |pos| content_start + pos);
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    let object = trimmed.find('{').zip(trimmed.rfind('}'));
    let array = trimmed.find('[').zip(trimmed.rfind(']'));
    match (object, array) {
        (Some((start, _)), Some((array_start, array_end))) if array_start < start => {
            &trimmed[array_start..=array_end]
        },
        (Some((start, end)), _) if start < end => &trimmed[start..=end],
        (_, Some((start, end))) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Parses a provider response into JSON.
///
/// # Errors
///
/// Returns [`Error::GenerationFailure`] at the [`GenerationStage::Parse`] stage
/// when no JSON value can be read from the response.
pub fn parse_json_payload(response: &str) -> Result<serde_json::Value> {
    let json = extract_json_from_response(response);
    serde_json::from_str(json).map_err(|e| {
        let preview: String = response.chars().take(200).collect();
        Error::GenerationFailure {
            stage: GenerationStage::Parse,
            cause: format!("invalid JSON: {e}. Response: {preview}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_extract_json_raw() {
        let response = r#"{"key": "value"}"#;
        assert_eq!(extract_json_from_response(response), r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_json_markdown() {
        let response = "```json\n{\"key\": \"value\"}\n```";
        let json = extract_json_from_response(response);
        assert_eq!(json, "{\"key\": \"value\"}");
    }

    #[test]
    fn test_extract_json_bare_fence() {
        let response = "Sure!\n```\n{\"practice\": []}\n```\nEnjoy.";
        assert_eq!(extract_json_from_response(response), "{\"practice\": []}");
    }

    #[test]
    fn test_extract_json_with_prefix() {
        let response = "Here is the result: {\"key\": \"value\"} hope this helps";
        assert_eq!(extract_json_from_response(response), r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_json_array() {
        let response = r#"[{"q": 1}, {"q": 2}]"#;
        assert_eq!(extract_json_from_response(response), r#"[{"q": 1}, {"q": 2}]"#);
    }

    #[test]
    fn test_parse_failure_is_parse_stage() {
        let err = parse_json_payload("I cannot help with that").unwrap_err();
        assert!(matches!(
            err,
            Error::GenerationFailure {
                stage: GenerationStage::Parse,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_json_payload() {
        let value = parse_json_payload("```json\n{\"stations\": [1, 2]}\n```").unwrap();
        assert_eq!(value["stations"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_build_provider_without_key_fails_per_call() {
        let provider = build_provider(&LlmConfig::default()).unwrap();
        assert_eq!(provider.name(), "anthropic");
        let err = provider.complete_with_system("sys", "user").unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_build_provider_selects_client() {
        let config = LlmConfig {
            provider: LlmProviderKind::OpenAi,
            api_key: Some(SecretString::from("sk-test".to_string())),
            ..LlmConfig::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }
}
