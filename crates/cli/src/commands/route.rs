//! Route command handler.

use crate::output;
use clap::Args;
use taxbot_agent::{Reasoner, Router};
use taxbot_core::AppConfig;

/// Show which pipeline a question would be routed to
#[derive(Args, Debug)]
pub struct RouteCommand {
    /// The question to classify
    pub question: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RouteCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing route command");

        config.validate()?;
        let router = Router::new(Reasoner::from_config(config)?);
        let route = router.route(&self.question).await?;

        if self.json {
            output::print_json(&serde_json::json!({
                "route": route,
                "label": route.label(),
            }))?;
        } else {
            println!("{}", route.label());
        }

        Ok(())
    }
}
