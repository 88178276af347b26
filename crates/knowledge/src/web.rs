//! Web search capability.

use crate::types::Document;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use taxbot_core::{AppError, AppResult};

/// External web search returning the same document shape as retrieval.
///
/// Zero results is `Ok(vec![])`, never an error.
#[async_trait::async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> AppResult<Vec<Document>>;
}

/// Tavily search API client.
pub struct TavilySearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    search_depth: String,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
    include_answer: bool,
    include_raw_content: bool,
    include_images: bool,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    content: String,
}

impl TavilySearch {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        search_depth: impl Into<String>,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Retrieval(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            search_depth: search_depth.into(),
        })
    }
}

#[async_trait::async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> AppResult<Vec<Document>> {
        let url = format!("{}/search", self.endpoint);

        tracing::debug!(query, max_results, "Sending Tavily search");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&TavilyRequest {
                query,
                max_results,
                search_depth: &self.search_depth,
                include_answer: false,
                include_raw_content: false,
                include_images: false,
            })
            .send()
            .await
            .map_err(|e| AppError::Retrieval(format!("Web search request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Retrieval(format!(
                "Web search error ({}): {}",
                status, error_text
            )));
        }

        let body: TavilyResponse = response
            .json()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to parse web search response: {}", e)))?;

        let documents: Vec<Document> = body
            .results
            .into_iter()
            .take(max_results)
            .map(|r| Document::new(r.content, r.url))
            .collect();

        tracing::debug!(hits = documents.len(), "Tavily search complete");
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_results_map_to_documents() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("authorization", "Bearer tvly-test"))
            .and(body_partial_json(serde_json::json!({
                "query": "공정시장가액비율 2026",
                "search_depth": "advanced"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "query": "공정시장가액비율 2026",
                "results": [
                    {"title": "t1", "url": "https://a.example", "content": "60%", "score": 0.9},
                    {"title": "t2", "url": "https://b.example", "content": "45%", "score": 0.8}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let search = TavilySearch::new(server.uri(), "tvly-test", "advanced").unwrap();
        let docs = search.search("공정시장가액비율 2026", 3).await.unwrap();

        assert_eq!(
            docs,
            vec![
                Document::new("60%", "https://a.example"),
                Document::new("45%", "https://b.example"),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_results_are_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []})),
            )
            .mount(&server)
            .await;

        let search = TavilySearch::new(server.uri(), "k", "basic").unwrap();
        assert!(search.search("nothing", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_http_error_is_retrieval_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let search = TavilySearch::new(server.uri(), "bad", "basic").unwrap();
        let err = search.search("q", 3).await.unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
    }
}
