//! Prompt library: built-in definitions plus workspace overrides.

use crate::builder::{build_prompt, PromptVars};
use crate::loader::{list_prompts, load_builtin, load_prompt, BUILTIN_PROMPTS};
use crate::types::{BuiltPrompt, PromptDefinition};
use std::collections::HashMap;
use std::path::Path;
use taxbot_core::{AppError, AppResult};

/// Every prompt the agent can render, resolved once at startup.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    definitions: HashMap<String, PromptDefinition>,
}

impl PromptLibrary {
    /// Library containing only the built-in definitions.
    pub fn builtin() -> AppResult<Self> {
        let mut definitions = HashMap::new();
        for (id, _) in BUILTIN_PROMPTS {
            definitions.insert(id.to_string(), load_builtin(id)?);
        }
        Ok(Self { definitions })
    }

    /// Built-in definitions, replaced by any `.taxbot/prompts/<id>.yml`.
    pub fn for_workspace(workspace_path: &Path) -> AppResult<Self> {
        let mut library = Self::builtin()?;

        for id in list_prompts(workspace_path)? {
            if !library.definitions.contains_key(&id) {
                tracing::warn!("Ignoring prompt override with unknown id: {}", id);
                continue;
            }
            let definition = load_prompt(workspace_path, &id)?;
            library.definitions.insert(id, definition);
        }

        Ok(library)
    }

    /// Replace or add a single definition.
    pub fn with_definition(mut self, definition: PromptDefinition) -> Self {
        self.definitions.insert(definition.id.clone(), definition);
        self
    }

    pub fn get(&self, id: &str) -> AppResult<&PromptDefinition> {
        self.definitions
            .get(id)
            .ok_or_else(|| AppError::Prompt(format!("Unknown prompt: {}", id)))
    }

    /// Render the prompt `id` with `variables`.
    pub fn render(&self, id: &str, variables: &PromptVars) -> AppResult<BuiltPrompt> {
        build_prompt(self.get(id)?, variables)
    }

    /// Sorted list of known prompt ids.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::vars;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_library_renders_generate() {
        let library = PromptLibrary::builtin().unwrap();
        let built = library
            .render(
                "rag.generate",
                &vars([("question", "근로소득 공제는?"), ("context", "제47조 근로소득공제")]),
            )
            .unwrap();

        assert!(built.system.unwrap().contains("제47조 근로소득공제"));
        assert_eq!(built.user, "근로소득 공제는?");
    }

    #[test]
    fn test_workspace_override_wins() {
        let temp_dir = TempDir::new().unwrap();
        let prompts = temp_dir.path().join(".taxbot/prompts");
        fs::create_dir_all(&prompts).unwrap();
        fs::write(
            prompts.join("chat.general.yml"),
            "id: chat.general\ntitle: Custom\napiVersion: \"1.0\"\ntemplate: \"custom {{query}}\"\noutput:\n  format: text\n",
        )
        .unwrap();

        let library = PromptLibrary::for_workspace(temp_dir.path()).unwrap();
        let built = library
            .render("chat.general", &vars([("query", "안녕")]))
            .unwrap();
        assert_eq!(built.user, "custom 안녕");
        assert!(built.system.is_none());
    }

    #[test]
    fn test_unknown_prompt() {
        let library = PromptLibrary::builtin().unwrap();
        assert!(library.render("missing", &PromptVars::new()).is_err());
    }

    #[test]
    fn test_ids_sorted() {
        let library = PromptLibrary::builtin().unwrap();
        let ids = library.ids();
        assert_eq!(ids.len(), BUILTIN_PROMPTS.len());
        assert!(ids.windows(2).all(|w| w[0] <= w[1]));
    }
}
