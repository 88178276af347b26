//! General conversation for questions outside the tax collections.

use crate::reasoner::{ModelTier, Reasoner};
use crate::stream::CallTag;
use taxbot_core::AppResult;
use taxbot_llm::ChatMessage;
use taxbot_prompt::vars;

#[derive(Clone)]
pub struct GeneralChat {
    reasoner: Reasoner,
}

impl GeneralChat {
    pub fn new(reasoner: Reasoner) -> Self {
        Self { reasoner }
    }

    pub fn with_reasoner(mut self, reasoner: Reasoner) -> Self {
        self.reasoner = reasoner;
        self
    }

    pub fn reasoner(&self) -> &Reasoner {
        &self.reasoner
    }

    /// History-aware free-form reply.
    pub async fn reply(&self, question: &str, history: &[ChatMessage]) -> AppResult<String> {
        self.reasoner
            .generate(
                "chat.general",
                &vars([("query", question)]),
                history,
                ModelTier::Main,
                CallTag::FinalAnswer,
            )
            .await
    }
}
