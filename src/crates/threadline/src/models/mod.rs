//! Domain models for Threadline

pub mod conversation;
pub mod history;

pub use conversation::{from_millis, Conversation, DEFAULT_TITLE};
pub use history::{ConversationHistory, TurnView};
