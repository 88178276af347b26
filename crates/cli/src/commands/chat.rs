//! Chat command handler.
//!
//! Interactive loop over a stored conversation. Each turn is answered with
//! the full stored history and saved only once it has completed.

use crate::output;
use crate::store::ConversationStore;
use clap::Args;
use taxbot_agent::TaxAgent;
use taxbot_core::AppConfig;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Interactive conversation with stored history
#[derive(Args, Debug)]
pub struct ChatCommand {
    /// Resume an existing conversation
    #[arg(long)]
    pub conversation: Option<String>,

    /// List stored conversations and exit
    #[arg(long)]
    pub list: bool,

    /// Print answers only once they are complete
    #[arg(long)]
    pub no_stream: bool,
}

impl ChatCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing chat command");

        let mut store = ConversationStore::open(&config.taxbot_dir().join("conversations.db"))?;

        if self.list {
            let conversations = store.list()?;
            if conversations.is_empty() {
                println!("No conversations yet");
            }
            for c in conversations {
                println!(
                    "{}  {}  ({} messages, {})",
                    c.id,
                    c.title,
                    c.message_count,
                    c.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
            return Ok(());
        }

        let conversation_id = match &self.conversation {
            Some(id) if store.exists(id)? => id.clone(),
            Some(id) => anyhow::bail!("Conversation '{}' not found (see 'taxbot chat --list')", id),
            None => uuid::Uuid::new_v4().to_string(),
        };

        config.validate()?;
        let agent = TaxAgent::from_config(config)?;

        eprintln!("Conversation {} (type 'exit' to quit)", conversation_id);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            eprint!("> ");
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let question = line.trim();
            if question.is_empty() {
                continue;
            }
            if question == "exit" || question == "quit" {
                break;
            }

            let history = store.history(&conversation_id)?;
            let result = if self.no_stream {
                agent.answer(question, &history).await.map(|outcome| {
                    output::print_outcome(&outcome);
                    outcome
                })
            } else {
                output::render_stream(agent.answer_stream(
                    question.to_string(),
                    history,
                    None,
                ))
                .await
            };

            // A failed turn is reported and not stored; the conversation goes on.
            match result {
                Ok(outcome) => store.append_turn(&conversation_id, question, &outcome.answer)?,
                Err(e) if e.is_transient() => {
                    tracing::warn!("Turn failed: {}", e);
                    eprintln!("Error: {} (temporary, ask again)", e);
                }
                Err(e) => {
                    tracing::error!("Turn failed: {}", e);
                    eprintln!("Error: {}", e);
                }
            }
        }

        Ok(())
    }
}
