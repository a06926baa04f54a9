//! Long-term memory injection
//!
//! Facts recalled for the live prompt are turned into system messages placed
//! just before the live user message. The memory service is optional and
//! never fatal to a request.

use crate::error::Result;
use crate::message::ContextMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix of every injected fact message
pub const FACT_PREFIX: &str = "User Data and fact: ";

/// A recalled fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFact {
    pub id: Option<String>,
    pub text: String,
    /// Relevance score, if the service reports one
    pub score: Option<f64>,
}

impl MemoryFact {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            score: None,
        }
    }

    pub fn to_message(&self) -> ContextMessage {
        ContextMessage::system(format!("{}{}", FACT_PREFIX, self.text))
    }
}

/// A completed prompt/answer pair offered to the memory service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnExchange {
    pub prompt: String,
    pub response: String,
}

impl TurnExchange {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
        }
    }

    /// Exchange as user/assistant messages
    pub fn messages(&self) -> Vec<ContextMessage> {
        vec![
            ContextMessage::user(self.prompt.clone()),
            ContextMessage::assistant(self.response.clone()),
        ]
    }
}

/// External memory service
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Facts relevant to `query` for `user_id`
    async fn search(&self, query: &str, user_id: &str) -> Result<Vec<MemoryFact>>;

    /// Offer an exchange for extraction
    async fn add(&self, exchange: &TurnExchange, user_id: &str) -> Result<()>;

    /// Remove everything stored for `user_id`
    async fn delete_all(&self, user_id: &str) -> Result<()>;
}

/// Fail-soft wrapper around an optional [`MemoryStore`]
#[derive(Clone, Default)]
pub struct MemoryInjector {
    store: Option<Arc<dyn MemoryStore>>,
}

impl MemoryInjector {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Injector with no backing service
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Fact messages for `query`. Errors are logged and yield no facts.
    pub async fn facts(&self, query: &str, user_id: &str) -> Vec<ContextMessage> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        if query.trim().is_empty() {
            return Vec::new();
        }

        match store.search(query, user_id).await {
            Ok(facts) => {
                debug!(user_id = %user_id, count = facts.len(), "Recalled memory facts");
                facts
                    .iter()
                    .filter(|fact| !fact.text.trim().is_empty())
                    .map(MemoryFact::to_message)
                    .collect()
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Memory search failed; continuing without facts");
                Vec::new()
            }
        }
    }

    /// Save an exchange. Errors are logged and swallowed.
    pub async fn remember(&self, exchange: &TurnExchange, user_id: &str) {
        let Some(store) = &self.store else {
            return;
        };

        match store.add(exchange, user_id).await {
            Ok(()) => debug!(user_id = %user_id, "Saved exchange to memory"),
            Err(e) => warn!(user_id = %user_id, error = %e, "Memory save failed"),
        }
    }

    /// Delete all memories for a user. Unlike recall, this reports failures.
    pub async fn forget(&self, user_id: &str) -> Result<bool> {
        match &self.store {
            Some(store) => {
                store.delete_all(user_id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for MemoryInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryInjector")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
