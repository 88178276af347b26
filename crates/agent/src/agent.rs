//! Turn-level facade: supervisor, routing and the three workers.

use crate::general::GeneralChat;
use crate::rag::RagGraph;
use crate::real_estate::RealEstatePipeline;
use crate::reasoner::Reasoner;
use crate::router::{Route, Router, Supervisor, SupervisorStep};
use crate::state::ConversationState;
use crate::stream::{StreamEvent, TaggedToken, Terminal, TokenFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taxbot_core::{AppConfig, AppError, AppResult, GraphSettings};
use taxbot_knowledge::{Retriever, TavilySearch, VectorRetriever, WebSearch};
use taxbot_llm::ChatMessage;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Result of one answered turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub route: Route,
    pub answer: String,
    pub retry_count: u32,
    pub terminal: Terminal,
}

impl From<TurnOutcome> for StreamEvent {
    fn from(outcome: TurnOutcome) -> Self {
        StreamEvent::Done {
            route: outcome.route,
            answer: outcome.answer,
            retry_count: outcome.retry_count,
            terminal: outcome.terminal,
        }
    }
}

/// Collaborators needed to build a [`TaxAgent`].
pub struct AgentParts {
    pub reasoner: Reasoner,
    pub income_tax: Arc<dyn Retriever>,
    pub real_estate_tax: Arc<dyn Retriever>,
    pub web: Arc<dyn WebSearch>,
    pub settings: GraphSettings,
    pub web_max_results: usize,
}

/// Answers tax questions. Stateless between turns.
#[derive(Clone)]
pub struct TaxAgent {
    supervisor: Supervisor,
    income_tax: RagGraph,
    real_estate: RealEstatePipeline,
    general: GeneralChat,
}

impl TaxAgent {
    pub fn new(parts: AgentParts) -> Self {
        let AgentParts {
            reasoner,
            income_tax,
            real_estate_tax,
            web,
            settings,
            web_max_results,
        } = parts;

        let top_k = settings.top_k;
        Self {
            supervisor: Supervisor::new(Router::new(reasoner.clone())),
            income_tax: RagGraph::new(reasoner.clone(), income_tax, web.clone(), settings)
                .with_web_max_results(web_max_results),
            real_estate: RealEstatePipeline::new(reasoner.clone(), real_estate_tax, web)
                .with_top_k(top_k),
            general: GeneralChat::new(reasoner),
        }
    }

    /// Build the agent from workspace configuration.
    ///
    /// Both collections must have been learned and the web search key must
    /// be set.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let reasoner = Reasoner::from_config(config)?;

        let embed_key = config.resolve_api_key("openai");
        let income_tax = VectorRetriever::open(
            &config.workspace,
            &config.knowledge.income_tax_collection,
            embed_key.as_deref(),
        )?;
        let real_estate_tax = VectorRetriever::open(
            &config.workspace,
            &config.knowledge.real_estate_tax_collection,
            embed_key.as_deref(),
        )?;

        let search = &config.web_search;
        let web_key = config.resolve_web_search_key().ok_or_else(|| {
            AppError::Config(format!(
                "Web search API key not set. Export {} to enable web search.",
                search.api_key_env
            ))
        })?;
        let web = TavilySearch::new(&search.endpoint, web_key, &search.search_depth)?;

        Ok(Self::new(AgentParts {
            reasoner,
            income_tax: Arc::new(income_tax),
            real_estate_tax: Arc::new(real_estate_tax),
            web: Arc::new(web),
            settings: config.graph.clone(),
            web_max_results: search.max_results,
        }))
    }

    /// Router used for the first step of every turn.
    pub fn router(&self) -> &Router {
        self.supervisor.router()
    }

    /// Answer `question` given prior turns.
    ///
    /// The supervisor routes the question, the chosen worker answers, and the
    /// supervisor stops as soon as the conversation ends with that answer.
    pub async fn answer(&self, question: &str, history: &[ChatMessage]) -> AppResult<TurnOutcome> {
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(question));

        let mut outcome = None;
        while let SupervisorStep::Dispatch(route) = self.supervisor.next(&messages).await? {
            let turn = self.dispatch(route, question, history).await?;
            messages.push(ChatMessage::assistant(turn.answer.clone()));
            outcome = Some(turn);
        }

        outcome.ok_or_else(|| AppError::Graph("Supervisor finished without an answer".to_string()))
    }

    /// Answer with a fixed route, skipping classification.
    pub async fn answer_as(
        &self,
        route: Route,
        question: &str,
        history: &[ChatMessage],
    ) -> AppResult<TurnOutcome> {
        self.dispatch(route, question, history).await
    }

    async fn dispatch(
        &self,
        route: Route,
        question: &str,
        history: &[ChatMessage],
    ) -> AppResult<TurnOutcome> {
        let span = tracing::info_span!("worker", %route);
        async {
            match route {
                Route::IncomeTax => {
                    let state = ConversationState::new(question, history.to_vec());
                    let outcome = self.income_tax.run(state).await?;
                    let (answer, retry_count) = outcome.state.into_answer();
                    Ok(TurnOutcome {
                        route,
                        answer,
                        retry_count,
                        terminal: outcome.terminal,
                    })
                }
                Route::RealEstateTax => {
                    let outcome = self.real_estate.run(question).await?;
                    Ok(TurnOutcome {
                        route,
                        answer: outcome.answer,
                        retry_count: 0,
                        terminal: Terminal::Done,
                    })
                }
                Route::GeneralChat => Ok(TurnOutcome {
                    route,
                    answer: self.general.reply(question, history).await?,
                    retry_count: 0,
                    terminal: Terminal::Done,
                }),
            }
        }
        .instrument(span)
        .await
    }

    fn with_tap(&self, tap: mpsc::UnboundedSender<TaggedToken>) -> Self {
        let tapped = |reasoner: &Reasoner| reasoner.clone().with_tap(tap.clone());
        Self {
            supervisor: Supervisor::new(
                self.supervisor
                    .router()
                    .clone()
                    .with_reasoner(tapped(self.supervisor.router().reasoner())),
            ),
            income_tax: self
                .income_tax
                .clone()
                .with_reasoner(tapped(self.income_tax.reasoner())),
            real_estate: self
                .real_estate
                .clone()
                .with_reasoner(tapped(self.real_estate.reasoner())),
            general: self
                .general
                .clone()
                .with_reasoner(tapped(self.general.reasoner())),
        }
    }

    /// Answer as a stream of events.
    ///
    /// Emits final-answer tokens as they are produced, then one `Done` or
    /// `Error`. Dropping the receiver cancels the turn at its next
    /// suspension point.
    pub fn answer_stream(
        &self,
        question: String,
        history: Vec<ChatMessage>,
        route: Option<Route>,
    ) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (tap_tx, mut tap_rx) = mpsc::unbounded_channel();
        let agent = self.with_tap(tap_tx);
        let filter = TokenFilter::default();

        tokio::spawn(async move {
            let turn = async {
                match route {
                    Some(route) => agent.answer_as(route, &question, &history).await,
                    None => agent.answer(&question, &history).await,
                }
            };
            tokio::pin!(turn);

            loop {
                tokio::select! {
                    _ = event_tx.closed() => {
                        tracing::debug!("Stream receiver dropped; abandoning turn");
                        return;
                    }
                    Some(token) = tap_rx.recv() => {
                        if let Some(event) = filter.apply(token) {
                            if event_tx.send(event).is_err() {
                                tracing::debug!("Stream receiver dropped; abandoning turn");
                                return;
                            }
                        }
                    }
                    result = &mut turn => {
                        while let Ok(token) = tap_rx.try_recv() {
                            if let Some(event) = filter.apply(token) {
                                let _ = event_tx.send(event);
                            }
                        }
                        let last = match result {
                            Ok(outcome) => outcome.into(),
                            Err(e) => StreamEvent::Error { message: e.to_string() },
                        };
                        let _ = event_tx.send(last);
                        return;
                    }
                }
            }
        });

        event_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxbot_core::AppConfig;

    #[test]
    fn test_from_config_requires_learned_collections() {
        let workspace = tempfile::tempdir().unwrap();
        let config = AppConfig {
            workspace: workspace.path().to_path_buf(),
            provider: "ollama".to_string(),
            ..Default::default()
        };

        let err = TaxAgent::from_config(&config).err().unwrap();
        assert!(matches!(err, AppError::Retrieval(_)));
        assert!(err.to_string().contains("income_tax"));
    }

    #[test]
    fn test_outcome_becomes_done_event() {
        let outcome = TurnOutcome {
            route: Route::RealEstateTax,
            answer: "약 240만원".to_string(),
            retry_count: 0,
            terminal: Terminal::Done,
        };

        let event: StreamEvent = outcome.into();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["route"], "real_estate_tax");
        assert_eq!(json["answer"], "약 240만원");
    }
}
