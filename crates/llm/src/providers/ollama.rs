//! Ollama LLM provider implementation.
//!
//! Uses the chat endpoint so system prompts, prior turns and JSON-schema
//! constrained output (`format`) are all supported.
//! Ollama API: https://github.com/ollama/ollama/blob/main/docs/api.md

use crate::client::{
    ChatMessage, LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage,
};
use super::lines::byte_lines;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use taxbot_core::{AppError, AppResult};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Ollama chat request format.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Ollama chat response format (also one NDJSON line when streaming).
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: String,
    #[serde(default)]
    message: Option<OllamaMessage>,
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChatResponse {
    fn usage(&self) -> LlmUsage {
        LlmUsage::new(
            self.prompt_eval_count.unwrap_or(0),
            self.eval_count.unwrap_or(0),
        )
    }

    fn into_content(self) -> String {
        self.message.map(|m| m.content).unwrap_or_default()
    }
}

/// Ollama LLM client.
pub struct OllamaClient {
    /// Base URL for Ollama API
    base_url: String,

    /// HTTP client
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client with default settings.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_OLLAMA_URL)
    }

    /// Create a new Ollama client with a custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create a client whose requests time out after `timeout`.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Convert LlmRequest to Ollama format.
    fn to_ollama_request(&self, request: &LlmRequest, stream: bool) -> OllamaChatRequest {
        OllamaChatRequest {
            model: request.model.clone(),
            messages: request.chat_messages(),
            stream,
            format: request.response_format.as_ref().map(|f| f.schema.clone()),
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }

    async fn post_chat(&self, body: &OllamaChatRequest) -> AppResult<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to send request to Ollama: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Llm(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmClient for OllamaClient {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        tracing::debug!(label = ?request.label, model = %request.model, "Sending chat request to Ollama");

        let body = self.to_ollama_request(request, false);
        let response = self.post_chat(&body).await?;

        let ollama_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse Ollama response: {}", e)))?;

        let usage = ollama_response.usage();
        let model = ollama_response.model.clone();
        let done = ollama_response.done;

        Ok(LlmResponse {
            content: ollama_response.into_content(),
            model,
            usage,
            done,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        tracing::debug!(label = ?request.label, model = %request.model, "Starting Ollama chat stream");

        let body = self.to_ollama_request(request, true);
        let response = self.post_chat(&body).await?;

        // Ollama sends newline-delimited JSON
        let stream = byte_lines(response.bytes_stream()).filter_map(|line| {
            let chunk = match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(parse_stream_line(&line)),
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(chunk)
        });

        Ok(Box::pin(stream))
    }
}

fn parse_stream_line(line: &str) -> AppResult<LlmStreamChunk> {
    let parsed: OllamaChatResponse = serde_json::from_str(line)
        .map_err(|e| AppError::Llm(format!("Failed to parse chunk: {}", e)))?;

    let usage = parsed.done.then(|| parsed.usage());
    let model = parsed.model.clone();
    let done = parsed.done;

    Ok(LlmStreamChunk {
        content: parsed.into_content(),
        model,
        done,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::lines::split_server::{serve_in_parts, split_at};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_ollama_client_creation() {
        let client = OllamaClient::new();
        assert_eq!(client.provider_name(), "ollama");
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_ollama_request_conversion() {
        let client = OllamaClient::new();
        let request = LlmRequest::new("Hello", "llama3")
            .with_system("be brief")
            .with_temperature(0.0)
            .with_max_tokens(100)
            .with_schema("score", serde_json::json!({"type": "object"}));

        let ollama_req = client.to_ollama_request(&request, false);
        assert_eq!(ollama_req.model, "llama3");
        assert_eq!(ollama_req.messages.len(), 2);
        assert_eq!(ollama_req.options.temperature, Some(0.0));
        assert_eq!(ollama_req.options.num_predict, Some(100));
        assert!(ollama_req.format.is_some());
    }

    #[test]
    fn test_parse_stream_line() {
        let line = r#"{"model":"llama3","message":{"role":"assistant","content":"소득"},"done":false}"#;
        let chunk = parse_stream_line(line).unwrap();
        assert_eq!(chunk.content, "소득");
        assert!(!chunk.done);
        assert!(chunk.usage.is_none());
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "message": {"role": "assistant", "content": "{\"Score\": 1}"},
                "done": true,
                "prompt_eval_count": 12,
                "eval_count": 4
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OllamaClient::with_base_url(server.uri());
        let response = client
            .complete(&LlmRequest::new("grade", "llama3"))
            .await
            .unwrap();

        assert_eq!(response.content, "{\"Score\": 1}");
        assert_eq!(response.usage.total_tokens, 16);
    }

    #[tokio::test]
    async fn test_api_error_is_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let client = OllamaClient::with_base_url(server.uri());
        let err = client
            .complete(&LlmRequest::new("hi", "missing"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Llm(_)));
        assert!(err.to_string().contains("model not found"));
    }

    #[tokio::test]
    async fn test_stream_rejoins_line_split_between_reads() {
        let ndjson = concat!(
            r#"{"model":"llama3","message":{"role":"assistant","content":"종합"},"done":false}"#,
            "\n",
            r#"{"model":"llama3","message":{"role":"assistant","content":"소득세"},"done":false}"#,
            "\n",
            r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true,"eval_count":2}"#,
            "\n",
        );
        let base = serve_in_parts("application/x-ndjson", split_at(ndjson, 20)).await;

        let client = OllamaClient::with_base_url(base);
        let mut stream = client
            .stream(&LlmRequest::new("q", "llama3").with_streaming())
            .await
            .unwrap();

        let mut text = String::new();
        let mut saw_done = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            text.push_str(&chunk.content);
            saw_done |= chunk.done;
        }
        assert_eq!(text, "종합소득세");
        assert!(saw_done);
    }

    #[tokio::test]
    async fn test_stream_accepts_unterminated_last_line() {
        let ndjson = concat!(
            r#"{"model":"llama3","message":{"role":"assistant","content":"세율"},"done":false}"#,
            "\n",
            r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true}"#,
        );
        // Cut inside the three-byte '세'.
        let cut = ndjson.find('세').unwrap() + 2;
        let base = serve_in_parts("application/x-ndjson", split_at(ndjson, cut)).await;

        let client = OllamaClient::with_base_url(base);
        let chunks: Vec<LlmStreamChunk> = client
            .stream(&LlmRequest::new("q", "llama3").with_streaming())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "세율");
        assert!(chunks[1].done);
    }
}
