//! Configuration management

pub mod loader;
pub mod schema;

pub use loader::{ConfigLoader, CONFIG_ENV_VAR};
pub use schema::{
    DatabaseConfig, LimitsConfig, LlmConfig, LoggingConfig, MemoryConfig, ModelConfig,
    ThreadlineConfig,
};
