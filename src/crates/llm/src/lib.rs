//! HTTP collaborators for threadline.
//!
//! - [`OpenAiClient`]: streaming chat completions against any
//!   OpenAI-compatible API
//! - [`Mem0Client`]: long-term memory recall and storage
//! - [`HttpFileResolver`]: attachment contents for the model call
//!
//! The chat client implements [`ChatModel`]; the other two implement the
//! collaborator traits from `thread-context`, so tests can swap any of them
//! for scripted fakes.

pub mod chat;
pub mod config;
pub mod error;
pub mod files;
pub mod mem0;
pub mod openai;
pub mod sse;

pub use chat::{collect_text, ChatModel, ChatRequest, TextStream};
pub use config::{MemoryClientConfig, RemoteLlmConfig, MEM0_BASE_URL, OPENAI_BASE_URL};
pub use error::{LlmError, Result};
pub use files::HttpFileResolver;
pub use mem0::Mem0Client;
pub use openai::OpenAiClient;
