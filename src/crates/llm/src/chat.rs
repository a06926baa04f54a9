//! Streaming chat model abstraction.

use crate::error::Result;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use thread_context::ContextMessage;

/// Incremental text deltas from a model.
///
/// Dropping the stream aborts the underlying request.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One chat completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ContextMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ContextMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A chat model that streams text
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streaming completion.
    async fn stream_chat(&self, request: ChatRequest) -> Result<TextStream>;

    /// Full completion text.
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        let stream = self.stream_chat(request).await?;
        collect_text(stream).await
    }
}

/// Concatenate a text stream, stopping at the first error.
pub async fn collect_text(mut stream: TextStream) -> Result<String> {
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        text.push_str(&delta?);
    }
    Ok(text)
}
