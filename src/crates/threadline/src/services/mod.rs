//! Services for business logic

pub mod chat_service;
pub mod submission;
pub mod title;

pub use chat_service::{
    ChatService, ChatSettings, Generation, GenerationEvent, GenerationStream, SubmittedPrompt,
};
pub use submission::{PromptSubmission, SubmissionValidator};
pub use title::{clean_title, fallback_title, TitleGenerator};
