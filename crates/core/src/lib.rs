//! Taxbot Core Library
//!
//! Foundational utilities shared by every crate in the workspace:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Configuration management

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{AppConfig, GraphSettings, GroundingMiss, RelevanceMiss, UnhelpfulMiss};
pub use error::{AppError, AppResult};
