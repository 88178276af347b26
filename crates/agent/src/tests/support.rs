//! Test doubles for the reasoning, retrieval and web search capabilities.

use crate::reasoner::Reasoner;
use futures::stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taxbot_core::{AppError, AppResult};
use taxbot_knowledge::{Document, Retriever, WebSearch};
use taxbot_llm::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
use taxbot_prompt::PromptLibrary;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

#[derive(Debug)]
struct Rule {
    label: String,
    needle: Option<String>,
    replies: VecDeque<Reply>,
}

/// `LlmClient` that answers from per-prompt scripts and records requests.
///
/// Replies for a prompt are consumed in order; the last one repeats.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    rules: Mutex<Vec<Rule>>,
    requests: Mutex<Vec<LlmRequest>>,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(self, label: &str, needle: Option<&str>, replies: Vec<Reply>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            label: label.to_string(),
            needle: needle.map(str::to_string),
            replies: replies.into(),
        });
        self
    }

    pub fn on<const N: usize>(self, label: &str, replies: [&str; N]) -> Self {
        let replies = replies.iter().map(|r| Reply::Text(r.to_string())).collect();
        self.rule(label, None, replies)
    }

    /// Script replies only for requests whose user message contains `needle`.
    /// Rules are checked in the order they were added.
    pub fn on_matching<const N: usize>(self, label: &str, needle: &str, replies: [&str; N]) -> Self {
        let replies = replies.iter().map(|r| Reply::Text(r.to_string())).collect();
        self.rule(label, Some(needle), replies)
    }

    pub fn failing(self, label: &str, message: &str) -> Self {
        self.rule(label, None, vec![Reply::Fail(message.to_string())])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Prompt ids of every request, in call order.
    pub fn labels(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| r.label.unwrap_or_default())
            .collect()
    }

    pub fn count(&self, label: &str) -> usize {
        self.labels().iter().filter(|l| *l == label).count()
    }

    async fn reply(&self, request: &LlmRequest) -> AppResult<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_reply(request)
    }

    fn next_reply(&self, request: &LlmRequest) -> AppResult<String> {
        self.requests.lock().unwrap().push(request.clone());

        let label = request.label.clone().unwrap_or_default();
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .find(|r| {
                r.label == label
                    && r.needle
                        .as_ref()
                        .map_or(true, |needle| request.prompt.contains(needle.as_str()))
            })
            .ok_or_else(|| AppError::Llm(format!("no script for {}", label)))?;

        let reply = if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        };

        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(AppError::Llm(message)),
            None => Err(AppError::Llm(format!("empty script for {}", label))),
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        let content = self.reply(request).await?;
        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            usage: LlmUsage::default(),
            done: true,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        let content = self.reply(request).await?;
        let model = request.model.clone();

        let mut chunks: Vec<AppResult<LlmStreamChunk>> = content
            .split_inclusive(' ')
            .map(|piece| {
                Ok(LlmStreamChunk {
                    content: piece.to_string(),
                    model: model.clone(),
                    done: false,
                    usage: None,
                })
            })
            .collect();
        chunks.push(Ok(LlmStreamChunk {
            content: String::new(),
            model,
            done: true,
            usage: Some(LlmUsage::default()),
        }));

        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Reasoner over the built-in prompts.
pub fn reasoner_for(llm: Arc<ScriptedLlm>) -> Reasoner {
    Reasoner::new(
        llm,
        Arc::new(PromptLibrary::builtin().unwrap()),
        "main",
        "small",
    )
}

/// Retriever returning fixed documents and recording queries.
#[derive(Debug, Default)]
pub struct StaticRetriever {
    documents: Vec<Document>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl StaticRetriever {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Retriever for StaticRetriever {
    async fn search(&self, query: &str, k: usize) -> AppResult<Vec<Document>> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(AppError::Retrieval("vector store unavailable".to_string()));
        }
        Ok(self.documents.iter().take(k).cloned().collect())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Web search returning fixed documents and recording queries.
#[derive(Debug, Default)]
pub struct StaticWebSearch {
    documents: Vec<Document>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl StaticWebSearch {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl WebSearch for StaticWebSearch {
    async fn search(&self, query: &str, max_results: usize) -> AppResult<Vec<Document>> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(AppError::Retrieval("search API unavailable".to_string()));
        }
        Ok(self.documents.iter().take(max_results).cloned().collect())
    }
}

pub fn statute_docs() -> Vec<Document> {
    vec![
        Document::new("제55조(세율) 종합소득 과세표준 1,400만원 이하 6%", "income_tax.md"),
        Document::new("제47조(근로소득공제)", "income_tax.md"),
    ]
}
