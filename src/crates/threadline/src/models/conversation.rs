//! Conversation model

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Title given to a conversation until one is generated
pub const DEFAULT_TITLE: &str = "New Chat";

/// A user's conversation and its aggregate counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    /// Unique conversation identifier (UUID string)
    pub id: String,

    /// Owning user
    pub user_id: String,

    pub title: String,

    /// Number of turns (edits do not add turns)
    pub turn_count: i64,

    /// Creation time (Unix milliseconds)
    pub created_at: i64,

    /// Last prompt or rename (Unix milliseconds)
    pub last_active_at: i64,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title: DEFAULT_TITLE.to_string(),
            turn_count: 0,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        from_millis(self.last_active_at)
    }
}

/// Convert stored Unix milliseconds to a timestamp
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
