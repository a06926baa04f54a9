//! Configuration schema for Threadline

use crate::error::{Result, ThreadlineError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use thread_context::{
    CharEstimateCounter, ModelRegistry, ModelSpec, TokenizerRegistry, DEFAULT_CHAT_MODEL,
    DEFAULT_RESPONSE_RESERVE,
};

/// Main Threadline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ThreadlineConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Chat model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Memory service configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Models added to (or overriding) the built-in table
    #[serde(default)]
    pub models: Vec<ModelConfig>,

    /// Prompt submission limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path (relative to ~/.threadline or absolute)
    pub path: String,

    /// Maximum pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "threadline.db".to_string(),
            max_connections: crate::db::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Chat model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// API key (supports environment variable interpolation)
    pub api_key: Option<String>,

    /// Model used when a request does not name one
    pub default_model: String,

    /// Model used for conversation titles
    pub title_model: String,

    /// Temperature for generation (0.0-2.0)
    pub temperature: f32,

    /// Seconds allowed for connecting, for the first response and between streamed chunks
    pub timeout_secs: u64,

    /// Fixed preamble sent ahead of every context
    pub system_prompt: String,

    /// Tokens held back for the answer
    pub response_reserve: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: llm::OPENAI_BASE_URL.to_string(),
            api_key: Some("${OPENAI_API_KEY}".to_string()),
            default_model: DEFAULT_CHAT_MODEL.to_string(),
            title_model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.7,
            timeout_secs: 60,
            system_prompt: "You are a helpful assistant. Answer clearly and concisely.".to_string(),
            response_reserve: DEFAULT_RESPONSE_RESERVE,
        }
    }
}

/// Memory service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: llm::MEM0_BASE_URL.to_string(),
            api_key: Some("${MEM0_API_KEY}".to_string()),
            timeout_secs: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive: "info", "threadline=debug,sqlx=warn"
    pub level: String,

    /// Log format: "compact", "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// One entry of the model table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub context_window: usize,
    /// Tokenizer for this model: "cl100k_base" (default) or "char_estimate"
    #[serde(default)]
    pub tokenizer: Option<String>,
}

impl ModelConfig {
    pub fn to_spec(&self) -> ModelSpec {
        let mut spec = ModelSpec::new(self.id.clone(), self.context_window);
        if let Some(label) = &self.label {
            spec = spec.with_label(label.clone());
        }
        if let Some(description) = &self.description {
            spec = spec.with_description(description.clone());
        }
        spec
    }
}

/// Prompt submission limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_attachments: usize,
    pub max_total_attachment_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_attachments: 5,
            max_total_attachment_bytes: 10 * 1024 * 1024,
        }
    }
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"))
}

impl ThreadlineConfig {
    /// Resolve environment variables in configuration values
    ///
    /// Supports ${VAR_NAME} anywhere in the string. Unset variables are left
    /// as written; a key that still contains a placeholder counts as missing.
    pub fn resolve_env_vars(&mut self) {
        self.llm.base_url = Self::expand_env_vars(&self.llm.base_url);
        self.llm.api_key = self.llm.api_key.as_deref().map(Self::expand_env_vars);
        self.memory.base_url = Self::expand_env_vars(&self.memory.base_url);
        self.memory.api_key = self.memory.api_key.as_deref().map(Self::expand_env_vars);
    }

    /// Expand `${VAR}` references in a string
    pub fn expand_env_vars(value: &str) -> String {
        env_pattern()
            .replace_all(value, |caps: &regex::Captures<'_>| {
                std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
            })
            .into_owned()
    }

    /// The chat API key, if one resolved
    pub fn llm_api_key(&self) -> Option<&str> {
        resolved(self.llm.api_key.as_deref())
    }

    /// The memory API key, if one resolved
    pub fn memory_api_key(&self) -> Option<&str> {
        resolved(self.memory.api_key.as_deref())
    }

    /// Get the resolved database path
    ///
    /// If path is relative, resolves it relative to `home`
    pub fn database_path_in(&self, home: &std::path::Path) -> PathBuf {
        let path = PathBuf::from(&self.database.path);
        if path.is_absolute() {
            path
        } else {
            home.join(path)
        }
    }

    /// Built-in model table extended with configured models
    pub fn model_registry(&self) -> ModelRegistry {
        self.models
            .iter()
            .fold(ModelRegistry::builtin(), |registry, model| registry.with_model(model.to_spec()))
    }

    /// OpenAI tokenizers plus any per-model overrides
    pub fn tokenizer_registry(&self) -> Result<TokenizerRegistry> {
        let registry = TokenizerRegistry::openai()?;
        Ok(self
            .models
            .iter()
            .filter(|model| model.tokenizer.as_deref() == Some("char_estimate"))
            .fold(registry, |registry, model| {
                registry.with_family(model.id.clone(), Arc::new(CharEstimateCounter::default()))
            }))
    }

    /// Check values the services rely on
    pub fn validate(&self) -> Result<()> {
        let registry = self.model_registry();
        for model in [&self.llm.default_model, &self.llm.title_model] {
            if !registry.contains(model) {
                return Err(ThreadlineError::Config(format!(
                    "Model '{}' is not in the model table",
                    model
                )));
            }
        }
        for model in &self.models {
            if model.context_window == 0 {
                return Err(ThreadlineError::Config(format!(
                    "Model '{}' has a zero context window",
                    model.id
                )));
            }
            match model.tokenizer.as_deref() {
                None | Some("cl100k_base") | Some("char_estimate") => {}
                Some(other) => {
                    return Err(ThreadlineError::Config(format!(
                        "Unknown tokenizer '{}' for model '{}'",
                        other, model.id
                    )))
                }
            }
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ThreadlineError::Config(format!(
                "Temperature {} is outside 0.0-2.0",
                self.llm.temperature
            )));
        }
        if !matches!(self.logging.format.as_str(), "compact" | "json") {
            return Err(ThreadlineError::Config(format!(
                "Unknown log format '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }
}

fn resolved(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty() && !env_pattern().is_match(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ThreadlineConfig::default();
        assert_eq!(config.database.path, "threadline.db");
        assert_eq!(config.llm.default_model, "gpt-3.5-turbo");
        assert_eq!(config.llm.response_reserve, 1500);
        assert_eq!(config.limits.max_attachments, 5);
        assert_eq!(config.limits.max_total_attachment_bytes, 10 * 1024 * 1024);
        assert!(!config.memory.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("THREADLINE_TEST_HOST", "example.test");
        assert_eq!(
            ThreadlineConfig::expand_env_vars("https://${THREADLINE_TEST_HOST}/v1"),
            "https://example.test/v1"
        );
        assert_eq!(
            ThreadlineConfig::expand_env_vars("${THREADLINE_TEST_SURELY_UNSET}"),
            "${THREADLINE_TEST_SURELY_UNSET}"
        );
        assert_eq!(ThreadlineConfig::expand_env_vars("plain"), "plain");
    }

    #[test]
    fn test_unresolved_key_is_missing() {
        let mut config = ThreadlineConfig::default();
        config.llm.api_key = Some("${THREADLINE_TEST_SURELY_UNSET}".to_string());
        config.resolve_env_vars();
        assert_eq!(config.llm_api_key(), None);

        config.llm.api_key = Some("sk-test".to_string());
        assert_eq!(config.llm_api_key(), Some("sk-test"));
    }

    #[test]
    fn test_model_registry_extends_builtin() {
        let mut config = ThreadlineConfig::default();
        config.models.push(ModelConfig {
            id: "llama-3-8b".to_string(),
            label: Some("Llama 3".to_string()),
            description: None,
            context_window: 8192,
            tokenizer: Some("char_estimate".to_string()),
        });

        let registry = config.model_registry();
        assert_eq!(registry.get("llama-3-8b").unwrap().context_window, 8192);
        assert_eq!(registry.get("llama-3-8b").unwrap().label, "Llama 3");
        assert!(registry.contains("gpt-4o"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_default_model() {
        let mut config = ThreadlineConfig::default();
        config.llm.default_model = "gpt-5".to_string();
        assert!(matches!(config.validate(), Err(ThreadlineError::Config(_))));

        let mut config = ThreadlineConfig::default();
        config.logging.format = "pretty-xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path_resolution() {
        let mut config = ThreadlineConfig::default();
        let home = PathBuf::from("/home/u/.threadline");
        assert_eq!(config.database_path_in(&home), home.join("threadline.db"));

        config.database.path = "/var/lib/threadline.db".to_string();
        assert_eq!(config.database_path_in(&home), PathBuf::from("/var/lib/threadline.db"));
    }
}
