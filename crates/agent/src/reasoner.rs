//! Reasoning calls made by graph nodes.
//!
//! A [`Reasoner`] renders a prompt from the library, sends it to the
//! configured [`LlmClient`] under a per-call timeout and returns either free
//! text or a schema-validated value. When a token tap is attached every call
//! streams and its tokens are forwarded with the call's [`CallTag`].

use crate::stream::{CallTag, TaggedToken};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use taxbot_core::{AppConfig, AppError, AppResult};
use taxbot_llm::{create_client_from_config, parse_structured, ChatMessage, LlmClient, LlmRequest};
use taxbot_prompt::{PromptLibrary, PromptVars};
use tokio::sync::mpsc;

/// Which configured model serves a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Answer generation
    Main,
    /// Routing, grading and rewriting
    Small,
}

/// Shared access to the reasoning capability.
#[derive(Clone)]
pub struct Reasoner {
    client: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    model: String,
    small_model: String,
    call_timeout: Duration,
    tap: Option<mpsc::UnboundedSender<TaggedToken>>,
}

impl Reasoner {
    pub fn new(
        client: Arc<dyn LlmClient>,
        prompts: Arc<PromptLibrary>,
        model: impl Into<String>,
        small_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            prompts,
            model: model.into(),
            small_model: small_model.into(),
            call_timeout: Duration::from_secs(60),
            tap: None,
        }
    }

    /// Build from the configured provider and the workspace prompt library.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let client = create_client_from_config(config)?;
        let prompts = Arc::new(PromptLibrary::for_workspace(&config.workspace)?);
        Ok(Self::new(
            client,
            prompts,
            config.model.clone(),
            config.small_model.clone(),
        )
        .with_timeout(Duration::from_secs(config.graph.call_timeout_secs)))
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Stream every call and forward its tokens to `tap`.
    pub fn with_tap(mut self, tap: mpsc::UnboundedSender<TaggedToken>) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Free-form completion of prompt `prompt_id`.
    pub async fn generate(
        &self,
        prompt_id: &str,
        variables: &PromptVars,
        history: &[ChatMessage],
        tier: ModelTier,
        tag: CallTag,
    ) -> AppResult<String> {
        let request = self.build_request(prompt_id, variables, history, tier)?;
        let text = self.call(request, tag).await?;
        Ok(text.trim().to_string())
    }

    /// Schema-constrained completion parsed into `T`.
    ///
    /// A response that does not match the schema is a `Classification` error.
    pub async fn classify<T: DeserializeOwned>(
        &self,
        prompt_id: &str,
        variables: &PromptVars,
        schema_name: &str,
        schema: serde_json::Value,
        tag: CallTag,
    ) -> AppResult<T> {
        let request = self
            .build_request(prompt_id, variables, &[], ModelTier::Small)?
            .with_temperature(0.0)
            .with_schema(schema_name, schema);
        let text = self.call(request, tag).await?;
        parse_structured(&text)
    }

    fn build_request(
        &self,
        prompt_id: &str,
        variables: &PromptVars,
        history: &[ChatMessage],
        tier: ModelTier,
    ) -> AppResult<LlmRequest> {
        let built = self.prompts.render(prompt_id, variables)?;
        let model = match tier {
            ModelTier::Main => &self.model,
            ModelTier::Small => &self.small_model,
        };

        let mut request = LlmRequest::new(built.user, model.as_str())
            .with_history(history)
            .with_label(prompt_id);
        if let Some(system) = built.system {
            request = request.with_system(system);
        }
        Ok(request)
    }

    async fn call(&self, request: LlmRequest, tag: CallTag) -> AppResult<String> {
        let label = request.label.clone().unwrap_or_default();
        tracing::debug!(prompt = %label, model = %request.model, ?tag, "Reasoning call");

        let fut = async {
            match &self.tap {
                Some(tap) => self.call_streaming(request.with_streaming(), tag, tap).await,
                None => Ok(self.client.complete(&request).await?.content),
            }
        };

        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| {
                AppError::Llm(format!(
                    "Call '{}' timed out after {}s",
                    label,
                    self.call_timeout.as_secs()
                ))
            })?
    }

    async fn call_streaming(
        &self,
        request: LlmRequest,
        tag: CallTag,
        tap: &mpsc::UnboundedSender<TaggedToken>,
    ) -> AppResult<String> {
        let mut stream = self.client.stream(&request).await?;
        let mut text = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if !chunk.content.is_empty() {
                text.push_str(&chunk.content);
                // A closed tap means the caller stopped listening; the turn
                // itself still completes.
                let _ = tap.send(TaggedToken {
                    tag,
                    content: chunk.content,
                });
            }
            if chunk.done {
                break;
            }
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::ScriptedLlm;
    use serde::Deserialize;
    use taxbot_prompt::vars;

    #[derive(Debug, Deserialize)]
    struct Score {
        #[serde(rename = "Score")]
        score: u8,
    }

    fn reasoner(llm: Arc<ScriptedLlm>) -> Reasoner {
        Reasoner::new(
            llm,
            Arc::new(PromptLibrary::builtin().unwrap()),
            "main-model",
            "small-model",
        )
    }

    #[tokio::test]
    async fn test_classify_uses_small_model_and_schema() {
        let llm = Arc::new(ScriptedLlm::new().on("grade.helpfulness", ["{\"Score\": 1}"]));
        let parsed: Score = reasoner(llm.clone())
            .classify(
                "grade.helpfulness",
                &vars([("question", "q"), ("answer", "a")]),
                "score",
                serde_json::json!({"type": "object"}),
                CallTag::Grader,
            )
            .await
            .unwrap();

        assert_eq!(parsed.score, 1);
        let calls = llm.requests();
        assert_eq!(calls[0].model, "small-model");
        assert!(calls[0].response_format.is_some());
    }

    #[tokio::test]
    async fn test_tap_receives_tagged_tokens() {
        let llm = Arc::new(ScriptedLlm::new().on("chat.general", ["안녕하세요 반갑습니다"]));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let text = reasoner(llm)
            .with_tap(tx)
            .generate(
                "chat.general",
                &vars([("query", "hi")]),
                &[],
                ModelTier::Main,
                CallTag::FinalAnswer,
            )
            .await
            .unwrap();

        assert_eq!(text, "안녕하세요 반갑습니다");
        let mut streamed = String::new();
        while let Ok(token) = rx.try_recv() {
            assert_eq!(token.tag, CallTag::FinalAnswer);
            streamed.push_str(&token.content);
        }
        assert_eq!(streamed, "안녕하세요 반갑습니다");
    }

    #[tokio::test]
    async fn test_slow_call_times_out_as_llm_error() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .on("chat.general", ["late"])
                .with_delay(Duration::from_millis(200)),
        );
        let err = reasoner(llm)
            .with_timeout(Duration::from_millis(20))
            .generate(
                "chat.general",
                &vars([("query", "hi")]),
                &[],
                ModelTier::Main,
                CallTag::FinalAnswer,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Llm(_)));
    }
}
