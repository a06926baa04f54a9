//! Repository layer for database access
//!
//! Each repository owns a handle to the shared [`Database`](crate::db::Database)
//! and maps rows to the records used by context construction.

pub mod conversation_repository;
pub mod response_repository;
pub mod turn_repository;

pub use conversation_repository::ConversationRepository;
pub use response_repository::ResponseRepository;
pub use turn_repository::{PromptPlacement, TurnRepository};
