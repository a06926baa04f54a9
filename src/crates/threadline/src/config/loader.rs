//! Configuration loader with layered sources
//!
//! Loads configuration from:
//! 1. Default values
//! 2. User-level config: ~/.threadline/threadline.toml
//! 3. Project-level config: ./.threadline/threadline.toml
//! 4. An explicit file named by `THREADLINE_CONFIG`
//!
//! Later layers override earlier ones key by key; nested tables are merged,
//! arrays and scalars are replaced.

use crate::config::schema::ThreadlineConfig;
use crate::error::{Result, ThreadlineError};
use crate::init::{CONFIG_DIR, CONFIG_FILE};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variable naming an extra config file
pub const CONFIG_ENV_VAR: &str = "THREADLINE_CONFIG";

/// Configuration loader that handles user, project and explicit configs
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: PathBuf,
    explicit_config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader for the standard locations
    pub fn new() -> Self {
        Self {
            user_config_path: dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE)),
            project_config_path: PathBuf::from(".").join(CONFIG_DIR).join(CONFIG_FILE),
            explicit_config_path: std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from),
        }
    }

    /// Use `path` as the highest-priority layer
    pub fn with_explicit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_config_path = Some(path.into());
        self
    }

    /// Load configuration from every layer that exists
    ///
    /// Missing files are skipped; a file that exists but does not parse is an error.
    pub async fn load(&self) -> Result<ThreadlineConfig> {
        let mut merged = toml::Value::try_from(ThreadlineConfig::default())
            .map_err(|e| ThreadlineError::Config(format!("Failed to encode defaults: {}", e)))?;
        info!("Loading configuration with defaults");

        let layers = self
            .user_config_path
            .iter()
            .chain(std::iter::once(&self.project_config_path))
            .chain(self.explicit_config_path.iter());

        for path in layers {
            match Self::read_layer(path).await? {
                Some(layer) => {
                    debug!(path = %path.display(), "Merging config layer");
                    merge_values(&mut merged, layer);
                }
                None => debug!(path = %path.display(), "Config layer not found, skipping"),
            }
        }

        let mut config: ThreadlineConfig = merged
            .try_into()
            .map_err(|e| ThreadlineError::Config(format!("Invalid configuration: {}", e)))?;

        config.resolve_env_vars();
        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Parse one file into a TOML table, or `None` if it does not exist
    async fn read_layer(path: &Path) -> Result<Option<toml::Value>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ThreadlineError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let value: toml::Value = toml::from_str(&content)
            .map_err(|e| ThreadlineError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        Ok(Some(value))
    }

    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_config_path.as_deref()
    }

    pub fn project_config_path(&self) -> &Path {
        &self.project_config_path
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively overlay `layer` onto `base`
fn merge_values(base: &mut toml::Value, layer: toml::Value) {
    match (base, layer) {
        (toml::Value::Table(base), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}
