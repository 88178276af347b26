//! Knowledge base configuration and on-disk layout.
//!
//! Each base lives in `.taxbot/knowledge/<base>/` with a `config.yaml` and a
//! SQLite `index.db`.

use crate::types::KnowledgeBaseConfig;
use std::fs;
use std::path::{Path, PathBuf};
use taxbot_core::{AppError, AppResult};

/// Load knowledge base configuration.
///
/// Loads from `.taxbot/knowledge/<base>/config.yaml` if it exists,
/// otherwise returns the defaults named after the base.
pub fn load_config(workspace: &Path, base_name: &str) -> AppResult<KnowledgeBaseConfig> {
    let config_path = get_config_path(workspace, base_name);

    if !config_path.exists() {
        tracing::debug!(
            "Using default knowledge base config for '{}' (no config file found)",
            base_name
        );
        return Ok(KnowledgeBaseConfig {
            name: base_name.to_string(),
            ..Default::default()
        });
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        AppError::Knowledge(format!("Failed to read config at {:?}: {}", config_path, e))
    })?;

    let mut config: KnowledgeBaseConfig = serde_yaml::from_str(&content).map_err(|e| {
        AppError::Knowledge(format!("Failed to parse config at {:?}: {}", config_path, e))
    })?;

    config.name = base_name.to_string();

    if config.chunk_overlap >= config.chunk_size {
        return Err(AppError::Knowledge(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            config.chunk_overlap, config.chunk_size
        )));
    }

    tracing::debug!("Loaded knowledge base config for '{}'", base_name);
    Ok(config)
}

/// Save knowledge base configuration.
pub fn save_config(workspace: &Path, config: &KnowledgeBaseConfig) -> AppResult<()> {
    let config_path = get_config_path(workspace, &config.name);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Knowledge(format!("Failed to create config directory: {}", e))
        })?;
    }

    let yaml = serde_yaml::to_string(config)
        .map_err(|e| AppError::Knowledge(format!("Failed to serialize config: {}", e)))?;

    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Knowledge(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved knowledge base config for '{}'", config.name);
    Ok(())
}

/// Get the base directory for a knowledge base.
pub fn get_base_dir(workspace: &Path, base_name: &str) -> PathBuf {
    workspace.join(".taxbot").join("knowledge").join(base_name)
}

/// Get the path to a base's config file.
pub fn get_config_path(workspace: &Path, base_name: &str) -> PathBuf {
    get_base_dir(workspace, base_name).join("config.yaml")
}

/// Get the SQLite index path for a base.
pub fn get_index_path(workspace: &Path, base_name: &str) -> PathBuf {
    get_base_dir(workspace, base_name).join("index.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_default_config() {
        let temp = TempDir::new().unwrap();
        let config = load_config(temp.path(), "income_tax").unwrap();

        assert_eq!(config.name, "income_tax");
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.chunk_size, 1000);
    }

    #[test]
    fn test_save_and_load_config() {
        let temp = TempDir::new().unwrap();
        let config = KnowledgeBaseConfig {
            name: "real_estate_tax".to_string(),
            provider: "trigram".to_string(),
            chunk_size: 1500,
            ..Default::default()
        };

        save_config(temp.path(), &config).unwrap();

        let loaded = load_config(temp.path(), "real_estate_tax").unwrap();
        assert_eq!(loaded.provider, "trigram");
        assert_eq!(loaded.chunk_size, 1500);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let temp = TempDir::new().unwrap();
        let config = KnowledgeBaseConfig {
            name: "bad".to_string(),
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        save_config(temp.path(), &config).unwrap();

        assert!(load_config(temp.path(), "bad").is_err());
    }

    #[test]
    fn test_paths() {
        let ws = Path::new("/ws");
        assert_eq!(
            get_index_path(ws, "income_tax"),
            PathBuf::from("/ws/.taxbot/knowledge/income_tax/index.db")
        );
    }
}
