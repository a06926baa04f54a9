//! First-time setup
//!
//! Creates the Threadline home directory and writes a default configuration.
//! The database itself is created and migrated on first use.

use crate::config::ThreadlineConfig;
use crate::error::{Result, ThreadlineError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default configuration directory name
pub const CONFIG_DIR: &str = ".threadline";

/// Default configuration file name
pub const CONFIG_FILE: &str = "threadline.toml";

/// Get the Threadline home directory (~/.threadline)
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined
pub fn threadline_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR))
        .ok_or_else(|| ThreadlineError::Config("Could not determine home directory".to_string()))
}

/// Get the path to the user-level configuration file
pub fn user_config_path() -> Result<PathBuf> {
    Ok(threadline_home()?.join(CONFIG_FILE))
}

/// Resolved database path for `config`
pub fn database_path(config: &ThreadlineConfig) -> Result<PathBuf> {
    Ok(config.database_path_in(&threadline_home()?))
}

/// Initialize the home directory and configuration
///
/// Returns the path of the configuration file.
///
/// # Arguments
///
/// * `force` - If true, overwrite an existing configuration
pub fn initialize(force: bool) -> Result<PathBuf> {
    initialize_in(&threadline_home()?, force)
}

/// Initialize under an explicit home directory
pub fn initialize_in(home: &Path, force: bool) -> Result<PathBuf> {
    info!(path = %home.display(), "Initializing Threadline");

    if !home.exists() {
        fs::create_dir_all(home)
            .map_err(|e| ThreadlineError::Config(format!("Failed to create directory: {}", e)))?;
        info!(path = %home.display(), "Created Threadline home directory");
    }

    let config_path = home.join(CONFIG_FILE);
    if !config_path.exists() || force {
        fs::write(&config_path, DEFAULT_CONFIG)
            .map_err(|e| ThreadlineError::Config(format!("Failed to write configuration: {}", e)))?;
        info!(path = %config_path.display(), "Created default configuration");
    } else {
        warn!(path = %config_path.display(), "Configuration already exists (use --force to overwrite)");
    }

    Ok(config_path)
}

const DEFAULT_CONFIG: &str = r#"# Threadline Configuration
#
# User-level settings. Project-specific settings can be placed in
# ./.threadline/threadline.toml, and THREADLINE_CONFIG may name one more file.

[database]
# Database file path (relative to ~/.threadline)
path = "threadline.db"
max_connections = 5

[llm]
# Any OpenAI-compatible endpoint
base_url = "https://api.openai.com/v1"
api_key = "${OPENAI_API_KEY}"

# Used when a request does not name a model
default_model = "gpt-3.5-turbo"
title_model = "gpt-3.5-turbo"

temperature = 0.7
timeout_secs = 60

# Tokens held back for the answer when trimming history
response_reserve = 1500

[memory]
# Long-term memory recall via mem0
enabled = false
base_url = "https://api.mem0.ai"
api_key = "${MEM0_API_KEY}"
timeout_secs = 10

[logging]
# Level or filter directive; RUST_LOG takes precedence
level = "info"

# Log format: "compact", "json"
format = "compact"

[limits]
max_attachments = 5
max_total_attachment_bytes = 10485760

# Extra models, added to the built-in table
# [[models]]
# id = "llama-3-8b"
# label = "Llama 3 8B"
# context_window = 8192
# tokenizer = "char_estimate"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_threadline_home() {
        if let Ok(home) = threadline_home() {
            assert!(home.ends_with(CONFIG_DIR));
        }
    }

    #[test]
    fn test_default_config_parses() {
        let config: ThreadlineConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.database.path, "threadline.db");
        assert_eq!(config.limits.max_total_attachment_bytes, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_initialize_respects_force() {
        let temp_dir = TempDir::new().unwrap();
        let home = temp_dir.path().join(CONFIG_DIR);

        let path = initialize_in(&home, false).unwrap();
        assert!(path.exists());

        fs::write(&path, "# edited\n").unwrap();
        initialize_in(&home, false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "# edited\n");

        initialize_in(&home, true).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("[database]"));
    }
}
