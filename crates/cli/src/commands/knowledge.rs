//! Knowledge command handler.
//!
//! Manages the statute collections the answer pipelines retrieve from.

use crate::output;
use clap::{Args, Subcommand};
use std::path::PathBuf;
use taxbot_core::AppConfig;
use taxbot_knowledge::{LearnOptions, SearchOptions};

/// Statute collection management
#[derive(Args, Debug)]
pub struct KnowledgeCommand {
    #[command(subcommand)]
    pub action: KnowledgeAction,
}

#[derive(Subcommand, Debug)]
pub enum KnowledgeAction {
    /// Learn from local files
    Learn(KnowledgeLearnCommand),
    /// Search a collection without generating an answer
    Search(KnowledgeSearchCommand),
    /// Show collection statistics
    Stats(KnowledgeStatsCommand),
    /// Remove every learned document from a collection
    Clean(KnowledgeCleanCommand),
}

/// Learn from local files
#[derive(Args, Debug)]
pub struct KnowledgeLearnCommand {
    /// Collection name (e.g. income_tax, real_estate_tax)
    pub base: String,

    /// Files or directories to learn from
    #[arg(long, required = true)]
    pub path: Vec<PathBuf>,

    /// Only learn paths containing one of these substrings
    #[arg(long)]
    pub include: Vec<String>,

    /// Skip paths containing any of these substrings
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Reset the collection before learning
    #[arg(long)]
    pub reset: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KnowledgeLearnCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing knowledge learn command for base '{}'", self.base);

        let options = LearnOptions {
            base_name: self.base.clone(),
            paths: self.path.clone(),
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            reset: self.reset,
        };

        let api_key = config.resolve_api_key("openai");
        let stats = taxbot_knowledge::learn(&config.workspace, options, api_key.as_deref()).await?;

        if self.json {
            output::print_json(&serde_json::json!({
                "base": self.base,
                "sourcesCount": stats.sources_count,
                "chunksCount": stats.chunks_count,
                "skippedCount": stats.skipped_count,
                "bytesProcessed": stats.bytes_processed,
                "durationSecs": stats.duration_secs,
            }))?;
        } else {
            println!(
                "Learned {} sources ({} chunks, {} bytes) in {:.2}s",
                stats.sources_count, stats.chunks_count, stats.bytes_processed, stats.duration_secs
            );
            if stats.skipped_count > 0 {
                println!("Skipped {} unreadable files", stats.skipped_count);
            }
        }

        Ok(())
    }
}

/// Search a collection
#[derive(Args, Debug)]
pub struct KnowledgeSearchCommand {
    /// Collection name
    pub base: String,

    /// Query text
    pub query: String,

    /// Number of documents to return
    #[arg(short = 'k', long, default_value = "3")]
    pub top_k: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KnowledgeSearchCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing knowledge search command for base '{}'", self.base);

        let options = SearchOptions {
            base_name: self.base.clone(),
            query: self.query.clone(),
            top_k: self.top_k,
        };

        let api_key = config.resolve_api_key("openai");
        let result = taxbot_knowledge::search(&config.workspace, options, api_key.as_deref()).await?;

        if self.json {
            let hits: Vec<_> = result
                .documents
                .iter()
                .zip(&result.scores)
                .map(|(doc, score)| {
                    serde_json::json!({
                        "source": doc.source,
                        "score": score,
                        "content": doc.content,
                    })
                })
                .collect();
            output::print_json(&serde_json::json!({ "base": self.base, "results": hits }))?;
        } else if result.documents.is_empty() {
            println!("No matching documents");
        } else {
            for (i, (doc, score)) in result.documents.iter().zip(&result.scores).enumerate() {
                println!("[{}] {} (score {:.3})", i + 1, doc.source, score);
                println!("{}", doc.content.trim());
                println!();
            }
        }

        Ok(())
    }
}

/// Clean a collection
#[derive(Args, Debug)]
pub struct KnowledgeCleanCommand {
    /// Collection name
    pub base: String,
}

impl KnowledgeCleanCommand {
    pub fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing knowledge clean command for base '{}'", self.base);

        taxbot_knowledge::clean(&config.workspace, &self.base)?;
        println!("Knowledge base '{}' cleaned", self.base);

        Ok(())
    }
}

/// Show collection stats
#[derive(Args, Debug)]
pub struct KnowledgeStatsCommand {
    /// Collection name
    pub base: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KnowledgeStatsCommand {
    pub fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing knowledge stats command for base '{}'", self.base);

        let stats = taxbot_knowledge::stats(&config.workspace, &self.base)?;

        if self.json {
            output::print_json(&serde_json::json!({
                "base": stats.base_name,
                "sourcesCount": stats.sources_count,
                "chunksCount": stats.chunks_count,
                "dbSizeBytes": stats.db_size_bytes,
                "lastLearnAt": stats.last_learn_at,
            }))?;
        } else {
            println!("Knowledge base: {}", stats.base_name);
            println!("  Sources: {}", stats.sources_count);
            println!("  Chunks: {}", stats.chunks_count);
            println!("  DB size: {} bytes", stats.db_size_bytes);
            if let Some(last_learn) = stats.last_learn_at {
                println!("  Last learn: {}", last_learn);
            }
        }

        Ok(())
    }
}

impl KnowledgeCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        match &self.action {
            KnowledgeAction::Learn(cmd) => cmd.execute(config).await,
            KnowledgeAction::Search(cmd) => cmd.execute(config).await,
            KnowledgeAction::Stats(cmd) => cmd.execute(config),
            KnowledgeAction::Clean(cmd) => cmd.execute(config),
        }
    }
}
