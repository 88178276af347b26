//! Prompt loader for built-in and workspace YAML prompt definitions.

use crate::types::PromptDefinition;
use std::path::{Path, PathBuf};
use taxbot_core::{AppError, AppResult};

/// Prompt definitions compiled into the binary, keyed by id.
pub const BUILTIN_PROMPTS: &[(&str, &str)] = &[
    ("router.classify", include_str!("../prompts/router.classify.yml")),
    ("chat.general", include_str!("../prompts/chat.general.yml")),
    (
        "income_tax.multi_query",
        include_str!("../prompts/income_tax.multi_query.yml"),
    ),
    (
        "income_tax.rewrite",
        include_str!("../prompts/income_tax.rewrite.yml"),
    ),
    ("search.query", include_str!("../prompts/search.query.yml")),
    ("rag.generate", include_str!("../prompts/rag.generate.yml")),
    ("grade.relevance", include_str!("../prompts/grade.relevance.yml")),
    (
        "grade.hallucination",
        include_str!("../prompts/grade.hallucination.yml"),
    ),
    (
        "grade.helpfulness",
        include_str!("../prompts/grade.helpfulness.yml"),
    ),
    ("real_estate.rag", include_str!("../prompts/real_estate.rag.yml")),
    (
        "real_estate.tax_base_equation",
        include_str!("../prompts/real_estate.tax_base_equation.yml"),
    ),
    (
        "real_estate.market_ratio",
        include_str!("../prompts/real_estate.market_ratio.yml"),
    ),
    (
        "real_estate.tax_base",
        include_str!("../prompts/real_estate.tax_base.yml"),
    ),
    (
        "real_estate.tax_amount",
        include_str!("../prompts/real_estate.tax_amount.yml"),
    ),
];

/// Directory holding workspace prompt overrides.
pub fn prompts_dir(workspace_path: &Path) -> PathBuf {
    workspace_path.join(".taxbot/prompts")
}

/// Parse a prompt definition from YAML text.
pub fn parse_prompt(contents: &str, origin: &str) -> AppResult<PromptDefinition> {
    let definition: PromptDefinition = serde_yaml::from_str(contents).map_err(|e| {
        AppError::Prompt(format!("Failed to parse prompt YAML {}: {}", origin, e))
    })?;

    validate_prompt(&definition)?;
    Ok(definition)
}

/// Load a prompt definition by ID from the workspace.
///
/// Searches for `<id>.yml` in the `.taxbot/prompts/` directory.
///
/// # Example
/// ```no_run
/// use taxbot_prompt::load_prompt;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let prompt = load_prompt(Path::new("."), "rag.generate")?;
/// println!("Loaded prompt: {}", prompt.title);
/// # Ok(())
/// # }
/// ```
pub fn load_prompt(workspace_path: &Path, prompt_id: &str) -> AppResult<PromptDefinition> {
    let prompt_file = prompts_dir(workspace_path).join(format!("{}.yml", prompt_id));

    tracing::debug!("Loading prompt from: {:?}", prompt_file);

    if !prompt_file.exists() {
        return Err(AppError::Prompt(format!(
            "Prompt file not found: {:?}",
            prompt_file
        )));
    }

    let contents = std::fs::read_to_string(&prompt_file).map_err(|e| {
        AppError::Prompt(format!(
            "Failed to read prompt file {:?}: {}",
            prompt_file, e
        ))
    })?;

    let definition = parse_prompt(&contents, &prompt_file.display().to_string())?;

    if definition.id != prompt_id {
        return Err(AppError::Prompt(format!(
            "Prompt file {:?} declares id '{}'",
            prompt_file, definition.id
        )));
    }

    tracing::info!("Loaded prompt override: {} ({})", definition.id, definition.title);

    Ok(definition)
}

/// Load a built-in prompt definition by ID.
pub fn load_builtin(prompt_id: &str) -> AppResult<PromptDefinition> {
    let (_, contents) = BUILTIN_PROMPTS
        .iter()
        .find(|(id, _)| *id == prompt_id)
        .ok_or_else(|| AppError::Prompt(format!("Unknown prompt: {}", prompt_id)))?;

    parse_prompt(contents, &format!("<builtin {}>", prompt_id))
}

/// List all prompt override IDs in the workspace.
pub fn list_prompts(workspace_path: &Path) -> AppResult<Vec<String>> {
    let dir = prompts_dir(workspace_path);

    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut prompt_ids = Vec::new();

    for entry in walkdir::WalkDir::new(&dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("yml") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                prompt_ids.push(stem.to_string());
            }
        }
    }

    prompt_ids.sort();
    Ok(prompt_ids)
}

/// Validate a prompt definition.
fn validate_prompt(def: &PromptDefinition) -> AppResult<()> {
    if def.id.is_empty() {
        return Err(AppError::Prompt("Prompt ID cannot be empty".to_string()));
    }

    if def.title.is_empty() {
        return Err(AppError::Prompt("Prompt title cannot be empty".to_string()));
    }

    if def.template.trim().is_empty() {
        return Err(AppError::Prompt(format!(
            "Prompt template cannot be empty: {}",
            def.id
        )));
    }

    if !def.api_version.contains('.') {
        return Err(AppError::Prompt(format!(
            "Invalid apiVersion format: {}. Expected format: 'x.y'",
            def.api_version
        )));
    }

    Ok(())
}
