//! Graph topology and the run loop.
//!
//! ```text
//! [Rewrite] -> Retrieve -> CheckRelevance -+-> Generate -> CheckHallucination -> CheckHelpfulness -> Done
//!                                          |      ^               |                      |
//!                                          +-> WebSearch          +----> Retry <---------+
//!                                                                          |
//!                                                     Rewrite | WebSearch | Generate | Fallback
//! ```
//!
//! Every correction edge passes through [`Node::Retry`], which increments
//! the retry count and diverts to [`Node::Fallback`] once the count exceeds
//! `max_retries`. Both quality gates check the budget before grading.

use crate::grading::{self, Grounding, Helpfulness, Relevance};
use crate::reasoner::Reasoner;
use crate::state::ConversationState;
use crate::stream::Terminal;
use std::sync::Arc;
use taxbot_core::{AppResult, GraphSettings, GroundingMiss, RelevanceMiss, UnhelpfulMiss};
use taxbot_knowledge::{Retriever, WebSearch};
use tracing::Instrument;

/// Graph vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Rewrite,
    Retrieve,
    CheckRelevance,
    WebSearch,
    Generate,
    CheckHallucination,
    /// Pass-through vertex; the helpfulness grader runs on its outgoing edge
    CheckHelpfulness,
    Retry(Recovery),
    Fallback,
}

/// Where a correction resumes when budget remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Rewrite,
    WebSearch,
    Generate,
}

impl Node {
    pub fn name(&self) -> &'static str {
        match self {
            Node::Rewrite => "rewrite",
            Node::Retrieve => "retrieve",
            Node::CheckRelevance => "check_relevance",
            Node::WebSearch => "web_search",
            Node::Generate => "generate",
            Node::CheckHallucination => "check_hallucination",
            Node::CheckHelpfulness => "check_helpfulness",
            Node::Retry(_) => "retry",
            Node::Fallback => "fallback",
        }
    }
}

impl From<Recovery> for Node {
    fn from(recovery: Recovery) -> Self {
        match recovery {
            Recovery::Rewrite => Node::Rewrite,
            Recovery::WebSearch => Node::WebSearch,
            Recovery::Generate => Node::Generate,
        }
    }
}

enum Transition {
    Next(Node),
    Finish(Terminal),
}

/// Result of running the graph to a terminal state.
#[derive(Debug, Clone)]
pub struct RagOutcome {
    pub state: ConversationState,
    pub terminal: Terminal,
    /// Nodes visited, in order
    pub path: Vec<Node>,
}

impl RagOutcome {
    /// How many times the Generate node ran.
    pub fn generations(&self) -> usize {
        self.path.iter().filter(|n| **n == Node::Generate).count()
    }
}

/// Self-correcting answer graph over one document collection.
#[derive(Clone)]
pub struct RagGraph {
    pub(super) reasoner: Reasoner,
    pub(super) retriever: Arc<dyn Retriever>,
    pub(super) web: Arc<dyn WebSearch>,
    pub(super) settings: GraphSettings,
    pub(super) web_max_results: usize,
}

impl RagGraph {
    pub fn new(
        reasoner: Reasoner,
        retriever: Arc<dyn Retriever>,
        web: Arc<dyn WebSearch>,
        settings: GraphSettings,
    ) -> Self {
        Self {
            reasoner,
            retriever,
            web,
            settings,
            web_max_results: 3,
        }
    }

    pub fn with_web_max_results(mut self, max_results: usize) -> Self {
        self.web_max_results = max_results;
        self
    }

    pub fn with_reasoner(mut self, reasoner: Reasoner) -> Self {
        self.reasoner = reasoner;
        self
    }

    pub fn reasoner(&self) -> &Reasoner {
        &self.reasoner
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// First node of a fresh turn.
    pub fn entry(&self) -> Node {
        if self.settings.rewrite_before_retrieve {
            Node::Rewrite
        } else {
            Node::Retrieve
        }
    }

    /// Run a fresh turn from the entry node.
    pub async fn run(&self, state: ConversationState) -> AppResult<RagOutcome> {
        self.run_from(self.entry(), state).await
    }

    /// Run from an arbitrary node until Done or Fallback.
    ///
    /// Capability failures abort the run with the node's error; no node is
    /// retried on transport failure.
    pub async fn run_from(&self, start: Node, mut state: ConversationState) -> AppResult<RagOutcome> {
        let mut node = start;
        let mut path = Vec::new();

        loop {
            path.push(node);
            let span = tracing::info_span!(
                "node",
                node = node.name(),
                retry_count = state.retry_count()
            );

            match self.step(node, &mut state).instrument(span).await? {
                Transition::Next(next) => node = next,
                Transition::Finish(terminal) => {
                    tracing::info!(
                        ?terminal,
                        retry_count = state.retry_count(),
                        steps = path.len(),
                        "Answer graph finished"
                    );
                    return Ok(RagOutcome {
                        state,
                        terminal,
                        path,
                    });
                }
            }
        }
    }

    fn budget_exhausted(&self, state: &ConversationState) -> bool {
        state.retry_count() > self.settings.max_retries
    }

    async fn step(&self, node: Node, state: &mut ConversationState) -> AppResult<Transition> {
        let next = match node {
            Node::Rewrite => {
                self.rewrite(state).await?;
                Node::Retrieve
            }

            Node::Retrieve => {
                self.retrieve(state).await?;
                Node::CheckRelevance
            }

            Node::CheckRelevance => {
                let verdict =
                    grading::grade_relevance(&self.reasoner, state.query(), state.context())
                        .await?;
                tracing::info!(?verdict, documents = state.context().len(), "Relevance graded");

                match (verdict, self.settings.relevance_miss) {
                    (Relevance::Relevant, _) => Node::Generate,
                    (Relevance::Irrelevant, RelevanceMiss::WebSearch) => Node::WebSearch,
                    (Relevance::Irrelevant, RelevanceMiss::Fallback) => Node::Fallback,
                }
            }

            Node::WebSearch => {
                self.web_search(state).await?;
                Node::Generate
            }

            Node::Generate => {
                self.generate(state).await?;
                Node::CheckHallucination
            }

            Node::CheckHallucination => {
                if self.budget_exhausted(state) {
                    tracing::warn!("Retry budget exhausted before grounding check");
                    Node::Fallback
                } else {
                    let verdict = grading::grade_hallucination(
                        &self.reasoner,
                        state.answer(),
                        state.context(),
                    )
                    .await?;
                    tracing::info!(?verdict, "Grounding graded");

                    match (verdict, self.settings.grounding_miss) {
                        (Grounding::Grounded, _) => Node::CheckHelpfulness,
                        (Grounding::Ungrounded, GroundingMiss::WebSearch) => {
                            Node::Retry(Recovery::WebSearch)
                        }
                        (Grounding::Ungrounded, GroundingMiss::Generate) => {
                            Node::Retry(Recovery::Generate)
                        }
                    }
                }
            }

            Node::CheckHelpfulness => {
                if self.budget_exhausted(state) {
                    tracing::warn!("Retry budget exhausted before helpfulness check");
                    Node::Fallback
                } else {
                    let verdict = grading::grade_helpfulness(
                        &self.reasoner,
                        state.question(),
                        state.answer(),
                    )
                    .await?;
                    tracing::info!(?verdict, "Helpfulness graded");

                    match (verdict, self.settings.unhelpful) {
                        (Helpfulness::Helpful, _) => return Ok(Transition::Finish(Terminal::Done)),
                        (Helpfulness::Unhelpful, UnhelpfulMiss::Rewrite) => {
                            Node::Retry(Recovery::Rewrite)
                        }
                        (Helpfulness::Unhelpful, UnhelpfulMiss::WebSearch) => {
                            Node::Retry(Recovery::WebSearch)
                        }
                    }
                }
            }

            Node::Retry(recovery) => {
                let retry_count = state.increment_retry();
                if retry_count > self.settings.max_retries {
                    tracing::warn!(retry_count, "Retry budget exhausted");
                    Node::Fallback
                } else {
                    tracing::warn!(retry_count, ?recovery, "Retrying answer");
                    recovery.into()
                }
            }

            Node::Fallback => {
                state.set_answer(self.settings.fallback_answer.clone());
                return Ok(Transition::Finish(Terminal::Fallback));
            }
        };

        Ok(Transition::Next(next))
    }
}
