//! LLM provider factory.
//!
//! Resolves a provider name plus the workspace configuration into a shared
//! client handle.

use crate::client::LlmClient;
use crate::providers::ollama::DEFAULT_OLLAMA_URL;
use crate::providers::openai::DEFAULT_OPENAI_URL;
use crate::providers::{OllamaClient, OpenAiClient};
use std::sync::Arc;
use std::time::Duration;
use taxbot_core::config::{AppConfig, ProviderConfig};
use taxbot_core::{AppError, AppResult};

/// Create an LLM client based on the provider name.
///
/// # Arguments
/// * `provider` - Provider identifier ("ollama", "openai")
/// * `endpoint` - Optional custom endpoint URL
/// * `api_key` - API key, required by "openai"
/// * `timeout` - Optional HTTP timeout per request
pub fn create_client(
    provider: &str,
    endpoint: Option<&str>,
    api_key: Option<&str>,
    timeout: Option<Duration>,
) -> AppResult<Arc<dyn LlmClient>> {
    match provider.to_lowercase().as_str() {
        "ollama" => {
            let base_url = endpoint.unwrap_or(DEFAULT_OLLAMA_URL);
            let client = match timeout {
                Some(timeout) => OllamaClient::with_timeout(base_url, timeout)?,
                None => OllamaClient::with_base_url(base_url),
            };
            Ok(Arc::new(client))
        }
        "openai" => {
            let api_key = api_key.ok_or_else(|| {
                AppError::Config("OpenAI provider requires API key".to_string())
            })?;
            let mut client =
                OpenAiClient::with_base_url(endpoint.unwrap_or(DEFAULT_OPENAI_URL), api_key);
            if let Some(timeout) = timeout {
                client = client.with_timeout(timeout)?;
            }
            Ok(Arc::new(client))
        }
        _ => Err(AppError::Config(format!("Unknown provider: {}", provider))),
    }
}

/// Create the client for the configured active provider.
pub fn create_client_from_config(config: &AppConfig) -> AppResult<Arc<dyn LlmClient>> {
    let provider_config = config.get_provider_config(&config.provider);
    let endpoint = provider_config.as_ref().and_then(|p| p.endpoint());
    let timeout = provider_config
        .as_ref()
        .and_then(|p| match p {
            ProviderConfig::OpenAI { timeout, .. } | ProviderConfig::Ollama { timeout, .. } => {
                *timeout
            }
        })
        .map(Duration::from_secs);
    let api_key = config.resolve_api_key(&config.provider);

    tracing::debug!(
        provider = %config.provider,
        endpoint = endpoint.unwrap_or("default"),
        "Creating LLM client"
    );

    create_client(&config.provider, endpoint, api_key.as_deref(), timeout)
}
