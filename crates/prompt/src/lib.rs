//! Prompt system for taxbot.
//!
//! This crate provides structured prompt management with:
//! - YAML-based prompt definitions, built in and overridable per workspace
//! - Handlebars template rendering

pub mod builder;
pub mod library;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::{build_prompt, vars, PromptVars};
pub use library::PromptLibrary;
pub use loader::{list_prompts, load_builtin, load_prompt};
pub use types::{BuiltPrompt, OutputFormat, PromptDefinition, PromptOutputSpec};
