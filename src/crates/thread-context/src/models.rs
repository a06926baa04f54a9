//! Model configuration table
//!
//! Maps an exact model identifier to its context-window size. Lookups never
//! fall back to a "closest" model: an unknown identifier is an error.

use crate::error::{ContextError, Result};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Model used when the caller does not pick one.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

/// Tokens held back for the model's answer.
pub const DEFAULT_RESPONSE_RESERVE: usize = 1500;

/// Configuration for a single chat model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Exact identifier sent to the provider
    pub id: String,

    /// Display label
    #[serde(default)]
    pub label: String,

    /// Short description
    #[serde(default)]
    pub description: String,

    /// Context window size in tokens
    pub context_window: usize,
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, context_window: usize) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            description: String::new(),
            context_window,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Tokens available for history once the response reserve is held back.
    pub fn history_budget(&self, response_reserve: usize) -> usize {
        self.context_window.saturating_sub(response_reserve)
    }
}

/// Table of known models, in display order
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelSpec>,
}

impl ModelRegistry {
    /// Empty registry
    pub fn empty() -> Self {
        Self { models: Vec::new() }
    }

    /// Registry with the built-in OpenAI chat models
    pub fn builtin() -> Self {
        Self {
            models: vec![
                ModelSpec::new("gpt-4o", 128_000)
                    .with_label("GPT-4o")
                    .with_description("Fast, smart, and multimodal. Best for most tasks."),
                ModelSpec::new("gpt-4", 8192)
                    .with_label("GPT-4")
                    .with_description("Highly accurate but slower and more expensive."),
                ModelSpec::new("gpt-4-turbo", 128_000)
                    .with_label("GPT-4 Turbo")
                    .with_description("Optimized GPT-4 with improved speed and larger context."),
                ModelSpec::new("gpt-3.5-turbo", 16385)
                    .with_label("GPT-3.5 Turbo")
                    .with_description("Very fast and affordable. Great for everyday use."),
            ],
        }
    }

    /// Add or replace a model. A spec with an existing id replaces it in place.
    pub fn register(&mut self, spec: ModelSpec) {
        match self.models.iter_mut().find(|m| m.id == spec.id) {
            Some(existing) => *existing = spec,
            None => self.models.push(spec),
        }
    }

    pub fn with_model(mut self, spec: ModelSpec) -> Self {
        self.register(spec);
        self
    }

    /// Look up a model by exact identifier
    pub fn get(&self, model_id: &str) -> Result<&ModelSpec> {
        self.models.iter().find(|m| m.id == model_id).ok_or_else(|| {
            error!(model = %model_id, "Unknown model requested");
            ContextError::UnknownModel(model_id.to_string())
        })
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m.id == model_id)
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
