//! Top-level routing and the supervisor loop guard.

use crate::reasoner::Reasoner;
use crate::stream::CallTag;
use serde::{Deserialize, Serialize};
use taxbot_core::AppResult;
use taxbot_llm::{ChatMessage, Role};
use taxbot_prompt::vars;

/// Pipeline that answers a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    IncomeTax,
    RealEstateTax,
    GeneralChat,
}

impl Route {
    /// Map a classifier label onto a route. Anything unrecognized is general
    /// chat.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "income_tax" => Route::IncomeTax,
            "real_estate_tax" => Route::RealEstateTax,
            _ => Route::GeneralChat,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Route::IncomeTax => "income_tax",
            Route::RealEstateTax => "real_estate_tax",
            Route::GeneralChat => "llm",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Route::IncomeTax => "income_tax",
            Route::RealEstateTax => "real_estate_tax",
            Route::GeneralChat => "general_chat",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize)]
struct RouteDecision {
    target: String,
}

fn route_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "target": {"type": "string", "enum": ["income_tax", "real_estate_tax", "llm"]}
        },
        "required": ["target"],
        "additionalProperties": false
    })
}

/// Classifies a question into a [`Route`].
#[derive(Clone)]
pub struct Router {
    reasoner: Reasoner,
}

impl Router {
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

    /// Classify the question text alone; history is not consulted.
    pub async fn route(&self, question: &str) -> AppResult<Route> {
        let decision: RouteDecision = self
            .reasoner
            .classify(
                "router.classify",
                &vars([("query", question)]),
                "route",
                route_schema(),
                CallTag::Router,
            )
            .await?;

        let route = Route::from_label(&decision.target);
        tracing::info!(label = %decision.target, %route, "Question routed");
        Ok(route)
    }
}

/// Next action of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorStep {
    Dispatch(Route),
    Done,
}

/// Decides whether the conversation needs a worker.
///
/// A conversation whose last message was written by the assistant is
/// already answered; it is never routed again.
#[derive(Clone)]
pub struct Supervisor {
    router: Router,
}

impl Supervisor {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn next(&self, messages: &[ChatMessage]) -> AppResult<SupervisorStep> {
        match messages.last() {
            Some(message) if message.role == Role::User => {
                Ok(SupervisorStep::Dispatch(self.router.route(&message.content).await?))
            }
            _ => Ok(SupervisorStep::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_label_closed_set() {
        assert_eq!(Route::from_label("income_tax"), Route::IncomeTax);
        assert_eq!(Route::from_label(" Real_Estate_Tax "), Route::RealEstateTax);
        assert_eq!(Route::from_label("llm"), Route::GeneralChat);
        assert_eq!(Route::from_label("weather"), Route::GeneralChat);
        assert_eq!(Route::from_label(""), Route::GeneralChat);
    }

    #[test]
    fn test_label_round_trip() {
        for route in [Route::IncomeTax, Route::RealEstateTax, Route::GeneralChat] {
            assert_eq!(Route::from_label(route.label()), route);
        }
    }
}
