//! Structured-output parsing.
//!
//! Classification calls ask the model for a single JSON object. Parsing is
//! strict: a missing field, a malformed object, or a value outside the schema
//! is a `Classification` error carrying a preview of what the model said.

use serde::de::DeserializeOwned;
use taxbot_core::{AppError, AppResult};

/// Characters of the completion kept in error messages.
const PREVIEW_CHARS: usize = 200;

/// Parse a completion into `T`.
///
/// Accepts a bare JSON object, or an object wrapped in a markdown code fence
/// or surrounded by prose.
pub fn parse_structured<T: DeserializeOwned>(completion: &str) -> AppResult<T> {
    let candidate = extract_json_object(completion).ok_or_else(|| {
        AppError::Classification(format!(
            "No JSON object in response | Response preview: {}",
            preview(completion)
        ))
    })?;

    serde_json::from_str::<T>(candidate).map_err(|e| {
        AppError::Classification(format!(
            "JSON parse error: {} | Response preview: {}",
            e,
            preview(completion)
        ))
    })
}

/// Locate the outermost `{ ... }` span.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}
