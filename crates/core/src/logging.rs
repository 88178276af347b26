//! Logging infrastructure.
//!
//! Observability is configured once, explicitly, at process start. Nothing in
//! the workspace touches tracing state as a side effect of loading a pipeline.
//! All logs go to stderr so stdout stays clean for answers.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{AppError, AppResult};

/// Output format for log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per record
    Json,
}

impl LogFormat {
    /// Parse a format name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Observability settings passed to [`init_logging`].
#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    /// Filter directive (e.g. "info", "taxbot_agent=debug")
    pub level: Option<String>,

    /// Record format
    pub format: LogFormat,

    /// Disable ANSI colors
    pub no_color: bool,
}

/// Initialize the tracing subscriber with stderr output.
///
/// # Example
/// ```no_run
/// use taxbot_core::logging::{init_logging, ObservabilityConfig};
///
/// init_logging(&ObservabilityConfig::default()).expect("Failed to initialize logging");
/// ```
pub fn init_logging(config: &ObservabilityConfig) -> AppResult<()> {
    let env_filter = build_filter(config.level.as_deref())?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(!config.no_color && supports_color()),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
    };

    result.map_err(|e| AppError::Config(format!("Failed to init logging: {}", e)))
}

/// Build the env filter, falling back to RUST_LOG and then "info".
fn build_filter(level: Option<&str>) -> AppResult<EnvFilter> {
    let default_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_str = level.unwrap_or(&default_level);

    EnvFilter::try_new(filter_str)
        .map_err(|e| AppError::Config(format!("Invalid log filter: {}", e)))
}

/// Check if the terminal supports color output.
fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err()
}
