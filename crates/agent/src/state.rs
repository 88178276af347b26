//! Per-turn conversation state threaded through the answer graph.

use taxbot_knowledge::Document;
use taxbot_llm::ChatMessage;

/// State of one turn.
///
/// Created fresh for each question and discarded after the answer is taken.
/// `question` and `chat_history` never change; `retry_count` only grows.
#[derive(Debug, Clone)]
pub struct ConversationState {
    question: String,
    query: String,
    context: Vec<Document>,
    answer: String,
    chat_history: Vec<ChatMessage>,
    retry_count: u32,
}

impl ConversationState {
    pub fn new(question: impl Into<String>, chat_history: Vec<ChatMessage>) -> Self {
        let question = question.into();
        Self {
            query: question.clone(),
            question,
            context: Vec::new(),
            answer: String::new(),
            chat_history,
            retry_count: 0,
        }
    }

    /// Start with a given retry count, for resuming a turn mid-graph.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_context(mut self, context: Vec<Document>) -> Self {
        self.context = context;
        self
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = answer.into();
        self
    }

    /// The user's question as asked.
    pub fn question(&self) -> &str {
        &self.question
    }

    /// Working query used for retrieval and search.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn context(&self) -> &[Document] {
        &self.context
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn chat_history(&self) -> &[ChatMessage] {
        &self.chat_history
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub(crate) fn set_query(&mut self, query: String) {
        self.query = query;
    }

    pub(crate) fn replace_context(&mut self, context: Vec<Document>) {
        self.context = context;
    }

    pub(crate) fn set_answer(&mut self, answer: String) {
        self.answer = answer;
    }

    pub(crate) fn increment_retry(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    /// Answer text and final retry count.
    pub fn into_answer(self) -> (String, u32) {
        (self.answer, self.retry_count)
    }
}

/// Render documents for a prompt, one block per document.
pub fn format_documents(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|d| format!("[{}]\n{}", d.source, d.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
