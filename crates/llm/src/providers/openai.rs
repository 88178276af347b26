//! OpenAI-compatible chat completions provider.
//!
//! Structured calls are sent with a `json_schema` response format. Streaming
//! reads server-sent events. Transient failures (network errors, 429 and 5xx
//! responses) are retried with exponential backoff.

use crate::client::{
    ChatMessage, LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage,
};
use super::lines::byte_lines;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use taxbot_core::{AppError, AppResult};

/// Default OpenAI endpoint.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Retry behaviour for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    delta: Option<ChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Failure of a single attempt, with whether it may be retried.
struct AttemptError {
    error: AppError,
    retryable: bool,
}

/// OpenAI LLM client.
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl OpenAiClient {
    /// Create a client for the default endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_OPENAI_URL, api_key)
    }

    /// Create a client for an OpenAI-compatible endpoint.
    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            retry: RetryConfig::default(),
        }
    }

    /// Apply a per-request HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> AppResult<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Llm(format!("Failed to create HTTP client: {}", e)))?;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn to_openai_request(&self, request: &LlmRequest, stream: bool) -> ChatCompletionRequest {
        let response_format = request.response_format.as_ref().map(|format| {
            serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": format.name,
                    "schema": format.schema,
                }
            })
        });

        ChatCompletionRequest {
            model: request.model.clone(),
            messages: request.chat_messages(),
            stream,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format,
        }
    }

    /// POST the body, retrying transient failures with exponential backoff.
    async fn post_with_retry(
        &self,
        body: &ChatCompletionRequest,
        label: Option<&str>,
    ) -> AppResult<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let label = label.unwrap_or("-");
        let mut retries = 0;

        loop {
            if retries > 0 {
                let delay =
                    Duration::from_millis(self.retry.retry_delay_ms * 2_u64.pow(retries - 1));
                tracing::warn!(
                    label,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying OpenAI request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();
            match self.send_once(&url, body).await {
                Ok(response) => {
                    tracing::debug!(
                        label,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "OpenAI request succeeded"
                    );
                    return Ok(response);
                }
                Err(attempt) => {
                    tracing::error!(
                        label,
                        error = %attempt.error,
                        retry = retries,
                        "OpenAI request failed"
                    );
                    if !attempt.retryable || retries >= self.retry.max_retries {
                        return Err(attempt.error);
                    }
                    retries += 1;
                }
            }
        }
    }

    async fn send_once(
        &self,
        url: &str,
        body: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, AttemptError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AttemptError {
                error: AppError::Llm(format!("Failed to send request to OpenAI: {}", e)),
                retryable: true,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(AttemptError {
            error: AppError::Llm(format!("OpenAI API error ({}): {}", status, error_text)),
            retryable: status.is_server_error() || status.as_u16() == 429,
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        let body = self.to_openai_request(request, false);
        let response = self.post_with_retry(&body, request.label.as_deref()).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse OpenAI response: {}", e)))?;

        let usage = parsed
            .usage
            .map(|u| LlmUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Llm("OpenAI response contained no choices".to_string()))?;

        Ok(LlmResponse {
            content: choice.message.and_then(|m| m.content).unwrap_or_default(),
            model: parsed.model,
            usage,
            done: choice.finish_reason.is_some(),
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        let body = self.to_openai_request(request, true);
        let response = self.post_with_retry(&body, request.label.as_deref()).await?;
        let model = request.model.clone();

        let stream = byte_lines(response.bytes_stream()).filter_map(move |line| {
            let chunk = match line {
                Ok(line) => parse_sse_line(&line, &model),
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(chunk)
        });

        Ok(Box::pin(stream))
    }
}

/// Parse one SSE line. Blank lines, comments and non-data fields yield
/// nothing.
fn parse_sse_line(line: &str, model: &str) -> Option<AppResult<LlmStreamChunk>> {
    let data = line.trim().strip_prefix("data:")?.trim();

    if data == "[DONE]" {
        return Some(Ok(LlmStreamChunk {
            content: String::new(),
            model: model.to_string(),
            done: true,
            usage: None,
        }));
    }

    Some(parse_sse_payload(data, model))
}

fn parse_sse_payload(data: &str, model: &str) -> AppResult<LlmStreamChunk> {
    let parsed: ChatCompletionResponse = serde_json::from_str(data)
        .map_err(|e| AppError::Llm(format!("Failed to parse chunk: {}", e)))?;

    let usage = parsed
        .usage
        .map(|u| LlmUsage::new(u.prompt_tokens, u.completion_tokens));
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .unwrap_or_default();

    Ok(LlmStreamChunk {
        content,
        model: if parsed.model.is_empty() {
            model.to_string()
        } else {
            parsed.model
        },
        done: false,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::lines::split_server::{serve_in_parts, split_at};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 5, "total_tokens": 25}
        })
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            retry_delay_ms: 1,
        }
    }

    #[test]
    fn test_structured_request_uses_json_schema() {
        let client = OpenAiClient::new("sk-test");
        let request = LlmRequest::new("grade", "gpt-4o-mini")
            .with_schema("relevance", serde_json::json!({"type": "object"}));

        let body = client.to_openai_request(&request, false);
        let format = body.response_format.unwrap();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "relevance");
    }

    #[test]
    fn test_parse_sse_line() {
        let chunk = parse_sse_line(
            "data: {\"model\":\"m\",\"choices\":[{\"delta\":{\"content\":\"세\"}}]}",
            "m",
        )
        .unwrap()
        .unwrap();
        assert_eq!(chunk.content, "세");
        assert!(parse_sse_line("", "m").is_none());
        assert!(parse_sse_line(": keep-alive", "m").is_none());
    }

    #[test]
    fn test_parse_sse_done_marker() {
        let chunk = parse_sse_line("data: [DONE]", "m").unwrap().unwrap();
        assert!(chunk.done);
    }

    #[tokio::test]
    async fn test_complete_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("답변")))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::with_base_url(server.uri(), "sk-test");
        let response = client
            .complete(&LlmRequest::new("질문", "gpt-4o-mini"))
            .await
            .unwrap();

        assert_eq!(response.content, "답변");
        assert_eq!(response.usage.total_tokens, 25);
        assert!(response.done);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::with_base_url(server.uri(), "sk-test").with_retry(fast_retry());
        let response = client
            .complete(&LlmRequest::new("q", "gpt-4o-mini"))
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::with_base_url(server.uri(), "sk-bad").with_retry(fast_retry());
        let err = client
            .complete(&LlmRequest::new("q", "gpt-4o-mini"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Llm(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_stream_collects_deltas() {
        let server = MockServer::start().await;
        let sse = "data: {\"model\":\"m\",\"choices\":[{\"delta\":{\"content\":\"양도\"}}]}\n\n\
                   data: {\"model\":\"m\",\"choices\":[{\"delta\":{\"content\":\"소득세\"}}]}\n\n\
                   data: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let client = OpenAiClient::with_base_url(server.uri(), "sk-test");
        let mut stream = client
            .stream(&LlmRequest::new("q", "m").with_streaming())
            .await
            .unwrap();

        let mut text = String::new();
        let mut saw_done = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            text.push_str(&chunk.content);
            saw_done |= chunk.done;
        }
        assert_eq!(text, "양도소득세");
        assert!(saw_done);
    }

    #[tokio::test]
    async fn test_stream_keeps_hangul_split_between_reads() {
        let sse = "data: {\"model\":\"m\",\"choices\":[{\"delta\":{\"content\":\"세율\"}}]}\n\n\
                   data: [DONE]\n\n";
        // Cut after the first byte of '세'.
        let cut = sse.find('세').unwrap() + 1;
        let base = serve_in_parts("text/event-stream", split_at(sse, cut)).await;

        let client = OpenAiClient::with_base_url(base, "sk-test");
        let mut stream = client
            .stream(&LlmRequest::new("q", "m").with_streaming())
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap().content);
        }
        assert_eq!(text, "세율");
    }
}
