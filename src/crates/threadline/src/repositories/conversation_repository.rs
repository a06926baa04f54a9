//! Conversation repository for database operations

use crate::db::Database;
use crate::error::{Result, ThreadlineError};
use crate::models::Conversation;
use chrono::Utc;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::info;

/// Repository for conversations and their cascading deletion
#[derive(Clone, Debug)]
pub struct ConversationRepository {
    db: Arc<Database>,
}

impl ConversationRepository {
    /// Create a new conversation repository
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Save a new conversation
    pub async fn create(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, turn_count, created_at, last_active_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(conversation.turn_count)
        .bind(conversation.created_at)
        .bind(conversation.last_active_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to create conversation: {}", e)))?;

        Ok(())
    }

    /// Load a conversation by ID, if it exists
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Conversation>> {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, user_id, title, turn_count, created_at, last_active_at
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to load conversation: {}", e)))
    }

    /// Load a conversation by ID, failing if it does not exist
    pub async fn get(&self, id: &str) -> Result<Conversation> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| ThreadlineError::NotFound(format!("Conversation {}", id)))
    }

    /// Conversations of a user, most recently active first
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, user_id, title, turn_count, created_at, last_active_at
             FROM conversations
             WHERE user_id = ?
             ORDER BY last_active_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to list conversations: {}", e)))
    }

    /// Set the title and mark the conversation active
    pub async fn rename(&self, id: &str, title: &str) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET title = ?, last_active_at = ? WHERE id = ?")
            .bind(title)
            .bind(Utc::now().timestamp_millis())
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to rename conversation: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(ThreadlineError::NotFound(format!("Conversation {}", id)));
        }
        Ok(())
    }

    /// Delete a conversation with all of its turns, prompts and responses
    ///
    /// Returns false if the conversation did not exist.
    pub async fn delete_cascade(&self, id: &str) -> Result<bool> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to begin transaction: {}", e)))?;

        let deleted = delete_conversation_rows(&mut *tx, id).await?;

        tx.commit()
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to commit delete: {}", e)))?;

        if deleted {
            info!(conversation_id = %id, "Deleted conversation");
        }
        Ok(deleted)
    }

    /// Delete every conversation of a user in one transaction
    ///
    /// Returns the number of conversations removed.
    pub async fn delete_all_for_user(&self, user_id: &str) -> Result<usize> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to begin transaction: {}", e)))?;

        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM conversations WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to list conversations: {}", e)))?;

        let mut deleted = 0;
        for id in &ids {
            if delete_conversation_rows(&mut *tx, id).await? {
                deleted += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to commit delete: {}", e)))?;

        info!(user_id = %user_id, count = deleted, "Deleted all conversations for user");
        Ok(deleted)
    }
}

/// Remove one conversation's rows in foreign-key order
async fn delete_conversation_rows(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let statements = [
        "DELETE FROM response_versions WHERE response_id IN (
             SELECT r.id FROM responses r JOIN prompts p ON r.prompt_id = p.id
             WHERE p.conversation_id = ?)",
        "DELETE FROM responses WHERE prompt_id IN (SELECT id FROM prompts WHERE conversation_id = ?)",
        "DELETE FROM prompt_attachments WHERE prompt_id IN (SELECT id FROM prompts WHERE conversation_id = ?)",
        "DELETE FROM prompts WHERE conversation_id = ?",
        "DELETE FROM turns WHERE conversation_id = ?",
    ];

    for statement in statements {
        sqlx::query(statement)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to delete conversation rows: {}", e)))?;
    }

    let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to delete conversation: {}", e)))?;

    Ok(result.rows_affected() > 0)
}
