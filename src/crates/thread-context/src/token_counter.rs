//! Token counting for different model families
//!
//! The trimmer never calls a tokenizer library directly. It asks a
//! [`TokenizerRegistry`] for the counter registered for a model family, so
//! providers with other tokenization schemes can be plugged in.

use crate::error::{ContextError, Result};
use crate::message::ContextMessage;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Fixed per-message cost for role and formatting tokens
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Counts tokens in arbitrary text
pub trait TokenCounter: Send + Sync {
    /// Count tokens in `text`. Must succeed for empty and very large input.
    fn count_text(&self, text: &str) -> Result<usize>;

    /// Counter name for diagnostics
    fn name(&self) -> &'static str;
}

/// Real BPE tokenizer backed by `tiktoken-rs`
#[derive(Clone)]
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
    name: &'static str,
}

impl TiktokenCounter {
    /// The `cl100k_base` encoding used by GPT-3.5 and GPT-4 family models
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| ContextError::Tokenizer(format!("Failed to load cl100k_base: {}", e)))?;
        Ok(Self {
            bpe: Arc::new(bpe),
            name: "cl100k_base",
        })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_text(&self, text: &str) -> Result<usize> {
        // encode_ordinary treats special-token strings in user text as plain text
        Ok(self.bpe.encode_ordinary(text).len())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenCounter").field("name", &self.name).finish()
    }
}

/// Character-ratio approximation for families without a bundled tokenizer
#[derive(Debug, Clone, Copy)]
pub struct CharEstimateCounter {
    tokens_per_char: f32,
}

impl CharEstimateCounter {
    pub fn new(tokens_per_char: f32) -> Self {
        Self { tokens_per_char }
    }
}

impl Default for CharEstimateCounter {
    fn default() -> Self {
        // ~4 chars per token
        Self::new(0.25)
    }
}

impl TokenCounter for CharEstimateCounter {
    fn count_text(&self, text: &str) -> Result<usize> {
        let chars = text.chars().count();
        Ok((chars as f32 * self.tokens_per_char).ceil() as usize)
    }

    fn name(&self) -> &'static str {
        "char_estimate"
    }
}

/// Maps model families (identifier prefixes) to token counters
#[derive(Clone)]
pub struct TokenizerRegistry {
    families: Vec<(String, Arc<dyn TokenCounter>)>,
    fallback: Arc<dyn TokenCounter>,
}

impl TokenizerRegistry {
    /// Registry where every model uses `fallback` until families are added
    pub fn new(fallback: Arc<dyn TokenCounter>) -> Self {
        Self {
            families: Vec::new(),
            fallback,
        }
    }

    /// OpenAI families on `cl100k_base`; unknown families use the same encoding
    /// as an approximation.
    pub fn openai() -> Result<Self> {
        let cl100k: Arc<dyn TokenCounter> = Arc::new(TiktokenCounter::cl100k()?);
        Ok(Self::new(cl100k.clone())
            .with_family("gpt-4", cl100k.clone())
            .with_family("gpt-3.5", cl100k))
    }

    /// Register a counter for every model whose id starts with `prefix`.
    ///
    /// The longest matching prefix wins.
    pub fn with_family(mut self, prefix: impl Into<String>, counter: Arc<dyn TokenCounter>) -> Self {
        self.families.push((prefix.into(), counter));
        self
    }

    /// Counter for a model identifier
    pub fn for_model(&self, model_id: &str) -> Arc<dyn TokenCounter> {
        let counter = self
            .families
            .iter()
            .filter(|(prefix, _)| model_id.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, counter)| counter.clone())
            .unwrap_or_else(|| self.fallback.clone());
        debug!(model = %model_id, tokenizer = counter.name(), "Selected tokenizer");
        counter
    }
}

impl std::fmt::Debug for TokenizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let families: Vec<_> = self
            .families
            .iter()
            .map(|(prefix, counter)| (prefix.as_str(), counter.name()))
            .collect();
        f.debug_struct("TokenizerRegistry")
            .field("families", &families)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

/// Estimated cost of one message: text tokens plus the fixed overhead.
pub fn count_message(counter: &dyn TokenCounter, message: &ContextMessage) -> Result<usize> {
    let text = message.content.text_for_counting();
    Ok(counter.count_text(&text)? + MESSAGE_OVERHEAD_TOKENS)
}
