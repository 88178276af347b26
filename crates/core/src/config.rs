//! Configuration management.
//!
//! Configuration is layered, lowest precedence first:
//! - Built-in defaults
//! - Config file (`.taxbot/config.yaml`, or `TAXBOT_CONFIG`)
//! - Environment variables (`TAXBOT_*`)
//! - Command-line flags (`with_overrides`)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::logging::{LogFormat, ObservabilityConfig};

/// Fixed answer used when the correction budget is exhausted.
pub const DEFAULT_FALLBACK_ANSWER: &str = "죄송합니다. 해당 질문에 대한 정보를 찾지 못했습니다. 다른 방식으로 질문해 주시거나, 세무 전문가에게 문의해 주세요.";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .taxbot/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Active LLM provider ("ollama" or "openai")
    pub provider: String,

    /// Model used for answer generation and rewriting
    pub model: String,

    /// Model used for graders and the router
    pub small_model: String,

    /// API key for the LLM provider
    pub api_key: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Log record format
    pub log_format: LogFormat,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// LLM provider configurations
    pub llm: Option<LlmConfig>,

    /// Self-correcting graph settings
    pub graph: GraphSettings,

    /// Web search settings
    pub web_search: WebSearchSettings,

    /// Knowledge collection names
    pub knowledge: KnowledgeSettings,
}

/// LLM configuration from config.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(rename = "activeProvider")]
    pub active_provider: String,

    pub providers: HashMap<String, ProviderConfig>,
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    OpenAI {
        #[serde(rename = "apiKeyEnv")]
        api_key_env: String,
        model: String,
        #[serde(rename = "smallModel")]
        small_model: Option<String>,
        endpoint: Option<String>,
        timeout: Option<u64>,
    },
    Ollama {
        endpoint: String,
        model: String,
        #[serde(rename = "smallModel")]
        small_model: Option<String>,
        timeout: Option<u64>,
    },
}

impl ProviderConfig {
    /// Endpoint override, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::OpenAI { endpoint, .. } => endpoint.as_deref(),
            Self::Ollama { endpoint, .. } => Some(endpoint.as_str()),
        }
    }
}

/// Where an "irrelevant" retrieval goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceMiss {
    WebSearch,
    Fallback,
}

/// Where an "ungrounded" answer goes (after the retry step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingMiss {
    WebSearch,
    Generate,
}

/// Where an "unhelpful" answer goes (after the retry step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhelpfulMiss {
    Rewrite,
    WebSearch,
}

/// Parameters of the self-correcting RAG graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphSettings {
    /// Correction loops allowed before the fallback answer
    pub max_retries: u32,

    /// Documents fetched per retrieval query
    pub top_k: usize,

    /// Expand the working query into alternative phrasings before retrieval
    pub multi_query: bool,

    /// Normalize the question into statute terms before the first retrieval
    pub rewrite_before_retrieve: bool,

    pub relevance_miss: RelevanceMiss,

    pub grounding_miss: GroundingMiss,

    pub unhelpful: UnhelpfulMiss,

    /// Timeout applied to each capability call, in seconds
    pub call_timeout_secs: u64,

    /// Answer returned by the fallback node
    pub fallback_answer: String,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            top_k: 3,
            multi_query: true,
            rewrite_before_retrieve: false,
            relevance_miss: RelevanceMiss::WebSearch,
            grounding_miss: GroundingMiss::WebSearch,
            unhelpful: UnhelpfulMiss::Rewrite,
            call_timeout_secs: 60,
            fallback_answer: DEFAULT_FALLBACK_ANSWER.to_string(),
        }
    }
}

/// External web search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSearchSettings {
    /// Environment variable holding the search API key
    pub api_key_env: String,

    /// Search API base URL
    pub endpoint: String,

    /// Results requested per search
    pub max_results: usize,

    /// "basic" or "advanced"
    pub search_depth: String,
}

impl Default for WebSearchSettings {
    fn default() -> Self {
        Self {
            api_key_env: "TAVILY_API_KEY".to_string(),
            endpoint: "https://api.tavily.com".to_string(),
            max_results: 3,
            search_depth: "advanced".to_string(),
        }
    }
}

/// Names of the knowledge collections backing each pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KnowledgeSettings {
    pub income_tax_collection: String,
    pub real_estate_tax_collection: String,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            income_tax_collection: "income_tax".to_string(),
            real_estate_tax_collection: "real_estate_tax".to_string(),
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    llm: Option<LlmConfig>,
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
    graph: Option<GraphSettings>,
    web_search: Option<WebSearchSettings>,
    knowledge: Option<KnowledgeSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    format: Option<LogFormat>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            provider: "ollama".to_string(),
            model: "llama3.2".to_string(),
            small_model: "llama3.2".to_string(),
            api_key: None,
            log_level: None,
            log_format: LogFormat::Pretty,
            verbose: false,
            no_color: false,
            llm: None,
            graph: GraphSettings::default(),
            web_search: WebSearchSettings::default(),
            knowledge: KnowledgeSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the YAML file and the environment.
    ///
    /// Environment variables:
    /// - `TAXBOT_WORKSPACE`: Override workspace path
    /// - `TAXBOT_CONFIG`: Path to config file
    /// - `TAXBOT_PROVIDER`: LLM provider
    /// - `TAXBOT_MODEL`: Generation model
    /// - `TAXBOT_SMALL_MODEL`: Grader/router model
    /// - `TAXBOT_API_KEY`: API key
    /// - `TAXBOT_MAX_RETRIES`: Correction budget
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use taxbot_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Workspace: {:?}", config.workspace);
    /// ```
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("TAXBOT_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("TAXBOT_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.workspace.join(".taxbot/config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        config.apply_env();

        Ok(config)
    }

    /// Apply `TAXBOT_*` environment overrides.
    fn apply_env(&mut self) {
        if let Ok(provider) = std::env::var("TAXBOT_PROVIDER") {
            self.provider = provider;
        }

        if let Ok(model) = std::env::var("TAXBOT_MODEL") {
            self.model = model;
        }

        if let Ok(model) = std::env::var("TAXBOT_SMALL_MODEL") {
            self.small_model = model;
        }

        if let Ok(retries) = std::env::var("TAXBOT_MAX_RETRIES") {
            match retries.parse() {
                Ok(n) => self.graph.max_retries = n,
                Err(_) => tracing::warn!("Ignoring invalid TAXBOT_MAX_RETRIES: {}", retries),
            }
        }

        if let Ok(key) = std::env::var("TAXBOT_API_KEY") {
            self.api_key = Some(key);
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            self.no_color = true;
        }
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        self.merge_yaml_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    fn merge_yaml_str(&self, contents: &str) -> Result<Self, serde_yaml::Error> {
        let config_file: ConfigFile = serde_yaml::from_str(contents)?;

        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(format) = logging.format {
                result.log_format = format;
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(llm) = config_file.llm {
            result.provider = llm.active_provider.clone();

            if let Some(provider_config) = llm.providers.get(&llm.active_provider) {
                let (model, small_model) = match provider_config {
                    ProviderConfig::OpenAI {
                        model, small_model, ..
                    }
                    | ProviderConfig::Ollama {
                        model, small_model, ..
                    } => (model, small_model),
                };
                result.model = model.clone();
                result.small_model = small_model.clone().unwrap_or_else(|| model.clone());
            }

            result.llm = Some(llm);
        }

        if let Some(graph) = config_file.graph {
            result.graph = graph;
        }

        if let Some(web_search) = config_file.web_search {
            result.web_search = web_search;
        }

        if let Some(knowledge) = config_file.knowledge {
            result.knowledge = knowledge;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        log_format: Option<LogFormat>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.provider = provider;
        }

        if let Some(model) = model {
            self.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if let Some(log_format) = log_format {
            self.log_format = log_format;
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Observability settings derived from this config.
    pub fn observability(&self) -> ObservabilityConfig {
        ObservabilityConfig {
            level: self.log_level.clone(),
            format: self.log_format,
            no_color: self.no_color,
        }
    }

    /// Get the path to the .taxbot directory.
    pub fn taxbot_dir(&self) -> PathBuf {
        self.workspace.join(".taxbot")
    }

    /// Ensure the .taxbot directory exists.
    pub fn ensure_taxbot_dir(&self) -> AppResult<()> {
        let dir = self.taxbot_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Config(format!("Failed to create .taxbot directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Get a provider's configuration block, if the YAML declared one.
    pub fn get_provider_config(&self, provider: &str) -> Option<ProviderConfig> {
        self.llm
            .as_ref()
            .and_then(|llm| llm.providers.get(provider).cloned())
    }

    /// Resolve the LLM API key: explicit key first, then the provider's env var.
    pub fn resolve_api_key(&self, provider: &str) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }

        match self.get_provider_config(provider) {
            Some(ProviderConfig::OpenAI { api_key_env, .. }) => std::env::var(&api_key_env).ok(),
            Some(ProviderConfig::Ollama { .. }) => None,
            None if provider == "openai" => std::env::var("OPENAI_API_KEY").ok(),
            None => None,
        }
    }

    /// Resolve the web search API key from its environment variable.
    pub fn resolve_web_search_key(&self) -> Option<String> {
        std::env::var(&self.web_search.api_key_env).ok()
    }

    /// Validate configuration for the active provider.
    pub fn validate(&self) -> AppResult<()> {
        let known_providers = ["openai", "ollama"];

        if !known_providers.contains(&self.provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                self.provider,
                known_providers.join(", ")
            )));
        }

        if self.provider == "openai" && self.resolve_api_key("openai").is_none() {
            return Err(AppError::Config(
                "OpenAI provider requires an API key (TAXBOT_API_KEY or apiKeyEnv)".to_string(),
            ));
        }

        if self.graph.top_k == 0 {
            return Err(AppError::Config("graph.topK must be at least 1".to_string()));
        }

        if self.graph.fallback_answer.trim().is_empty() {
            return Err(AppError::Config(
                "graph.fallbackAnswer must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
