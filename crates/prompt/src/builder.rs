//! Prompt builder for rendering templates.

use crate::types::{BuiltPrompt, PromptDefinition};
use handlebars::Handlebars;
use std::collections::HashMap;
use taxbot_core::{AppError, AppResult};

/// Template variables.
pub type PromptVars = HashMap<String, String>;

/// Build a `PromptVars` map from string pairs.
pub fn vars<const N: usize>(pairs: [(&str, &str); N]) -> PromptVars {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Render a definition's system and user templates.
///
/// Rendering is strict: a variable referenced by the template but absent
/// from `variables` is an error rather than an empty string.
///
/// # Example
/// ```no_run
/// use taxbot_prompt::{build_prompt, load_builtin, vars};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let def = load_builtin("search.query")?;
/// let built = build_prompt(&def, &vars([("query", "양도소득세 세율")]))?;
/// println!("User prompt: {}", built.user);
/// # Ok(())
/// # }
/// ```
pub fn build_prompt(definition: &PromptDefinition, variables: &PromptVars) -> AppResult<BuiltPrompt> {
    tracing::trace!("Building prompt: {}", definition.id);

    let system = definition
        .system
        .as_deref()
        .map(|template| render_template(template, variables))
        .transpose()?;

    let user = render_template(&definition.template, variables)?;

    Ok(BuiltPrompt {
        system,
        user,
        source_prompt_id: definition.id.clone(),
        format: definition.output.format,
    })
}

/// Render a Handlebars template with variables.
fn render_template(template: &str, variables: &PromptVars) -> AppResult<String> {
    let mut handlebars = Handlebars::new();

    // Prompts are plain text
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.set_strict_mode(true);

    handlebars
        .register_template_string("prompt", template)
        .map_err(|e| AppError::Prompt(format!("Failed to register template: {}", e)))?;

    let rendered = handlebars
        .render("prompt", variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))?;

    Ok(rendered.trim_end().to_string())
}
