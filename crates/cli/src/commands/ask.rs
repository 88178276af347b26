//! Ask command handler.
//!
//! Answers one question, optionally continuing a conversation whose prior
//! turns are read from a JSON file.

use super::RouteArg;
use crate::output;
use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use taxbot_agent::TaxAgent;
use taxbot_core::AppConfig;
use taxbot_llm::ChatMessage;

/// Answer a single question
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: String,

    /// JSON file with prior turns: [{"role": "user", "content": "..."}, ...]
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Skip classification and use this pipeline
    #[arg(long, value_enum)]
    pub route: Option<RouteArg>,

    /// Print the answer only once it is complete
    #[arg(long)]
    pub no_stream: bool,

    /// Output as JSON (implies --no-stream)
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing ask command");
        tracing::debug!("Ask command options: {:?}", self);

        config.validate()?;
        let history = match &self.history {
            Some(path) => read_history(path)?,
            None => Vec::new(),
        };
        let agent = TaxAgent::from_config(config)?;
        let route = self.route.map(Into::into);

        if self.json || self.no_stream {
            let outcome = match route {
                Some(route) => agent.answer_as(route, &self.question, &history).await?,
                None => agent.answer(&self.question, &history).await?,
            };
            if self.json {
                output::print_json(&output::outcome_json(&outcome))?;
            } else {
                output::print_outcome(&outcome);
            }
        } else {
            let events = agent.answer_stream(self.question.clone(), history, route);
            output::render_stream(events).await?;
        }

        Ok(())
    }
}

fn read_history(path: &Path) -> anyhow::Result<Vec<ChatMessage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("History file {:?} is not a list of chat messages", path))
}
