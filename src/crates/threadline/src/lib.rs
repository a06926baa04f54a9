//! # Threadline - conversation store and chat backend
//!
//! Stores branching conversations (prompt edits, regenerated responses) in
//! SQLite and answers prompts with a model call whose history is rebuilt,
//! enriched with long-term memory facts and trimmed to the model's context
//! window.
//!
//! ## Features
//!
//! - **Append-only turns** - edits and regenerations never overwrite earlier records
//! - **Token-budgeted context** - oldest history is dropped first
//! - **Memory recall** - optional mem0 facts injected before the live prompt
//! - **Layered config** - user, project and explicit TOML files
//! - **CLI** - the `threadline` binary drives every operation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use threadline::{ChatService, ConfigLoader, LazyDatabase, PromptSubmission};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ConfigLoader::new().load().await?;
//! let db = LazyDatabase::new(threadline::init::database_path(&config)?, config.database.max_connections);
//! let service = ChatService::from_config(&config, db)?;
//!
//! let submitted = service
//!     .submit_prompt(PromptSubmission::new("user-1", "Plan a week in Lisbon"))
//!     .await?;
//! let mut generation = service.respond("user-1", &submitted.prompt.id, None).await?;
//! while let Some(event) = generation.events.next().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod init;
pub mod logging;
pub mod models;
pub mod repositories;
pub mod services;

pub use config::{ConfigLoader, ThreadlineConfig};
pub use db::{Database, LazyDatabase};
pub use error::{Result, ThreadlineError};
pub use models::{Conversation, ConversationHistory, TurnView};
pub use repositories::{ConversationRepository, ResponseRepository, TurnRepository};
pub use services::{
    ChatService, ChatSettings, Generation, GenerationEvent, PromptSubmission, SubmissionValidator,
    SubmittedPrompt, TitleGenerator,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
