//! Conversation context construction
//!
//! Turns a branching, multi-versioned chat history into a bounded list of
//! messages for a model call:
//!
//! - [`records`]: append-only turn logs (prompt edits, response versions)
//! - [`reconstruct`]: the latest linear thread from those logs
//! - [`memory`]: recalled facts injected as system messages
//! - [`trimmer`]: newest-first trimming against a model's token budget
//! - [`context`]: the whole pipeline for one live prompt
//!
//! # Example
//!
//! ```rust,no_run
//! use thread_context::{ContextMessage, ContextTrimmer};
//!
//! # fn main() -> thread_context::Result<()> {
//! let trimmer = ContextTrimmer::openai()?;
//! let history = vec![
//!     ContextMessage::user("Hello"),
//!     ContextMessage::assistant("Hi! How can I help?"),
//! ];
//! let kept = trimmer.trim("gpt-3.5-turbo", &history)?;
//! assert_eq!(kept.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod memory;
pub mod message;
pub mod models;
pub mod reconstruct;
pub mod records;
pub mod token_counter;
pub mod trimmer;

pub use context::{AssembledContext, ContextAssembler, ContextRequest, ContextUsage, WarningLevel};
pub use error::{ContextError, Result};
pub use memory::{MemoryFact, MemoryInjector, MemoryStore, TurnExchange, FACT_PREFIX};
pub use message::{ContentPart, ContextMessage, FileData, MessageContent, Role};
pub use models::{ModelRegistry, ModelSpec, DEFAULT_CHAT_MODEL, DEFAULT_RESPONSE_RESERVE};
pub use reconstruct::{FileResolver, ReferenceResolver, ThreadReconstructor};
pub use records::{
    Attachment, Feedback, PromptRecord, ResponseRecord, ResponseState, ResponseVersion, TurnLog,
};
pub use token_counter::{
    CharEstimateCounter, TiktokenCounter, TokenCounter, TokenizerRegistry, MESSAGE_OVERHEAD_TOKENS,
};
pub use trimmer::{ContextTrimmer, TrimResult};
