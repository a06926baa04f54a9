//! Turn repository: prompts, their attachments and turn snapshots

use crate::db::Database;
use crate::error::{Result, ThreadlineError};
use crate::models::from_millis;
use crate::repositories::response_repository::load_responses_for_conversation;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use std::sync::Arc;
use thread_context::{Attachment, PromptRecord, TurnLog};
use tracing::debug;
use uuid::Uuid;

/// Where a stored prompt landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPlacement {
    pub turn_id: String,
    pub ordinal: i64,
    /// False when the prompt is an edit that joined an existing turn
    pub new_turn: bool,
}

/// Repository for turns and the prompt records inside them
#[derive(Clone, Debug)]
pub struct TurnRepository {
    db: Arc<Database>,
}

impl TurnRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a prompt to its conversation in one transaction.
    ///
    /// An edit (`previous_prompt_id` set) joins the turn of the prompt it
    /// supersedes; anything else opens a new turn and bumps the conversation's
    /// turn counter. Either way the conversation is marked active.
    pub async fn append_prompt(&self, prompt: &PromptRecord) -> Result<PromptPlacement> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to begin transaction: {}", e)))?;

        let placement = match &prompt.previous_prompt_id {
            Some(previous) => join_turn(&mut *tx, &prompt.conversation_id, previous).await?,
            None => open_turn(&mut *tx, &prompt.conversation_id, prompt.created_at.timestamp_millis()).await?,
        };

        sqlx::query(
            "INSERT INTO prompts (id, turn_id, conversation_id, previous_prompt_id, text, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&prompt.id)
        .bind(&placement.turn_id)
        .bind(&prompt.conversation_id)
        .bind(&prompt.previous_prompt_id)
        .bind(&prompt.text)
        .bind(prompt.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to save prompt: {}", e)))?;

        for (position, attachment) in prompt.attachments.iter().enumerate() {
            sqlx::query(
                "INSERT INTO prompt_attachments (prompt_id, position, file_name, file_size, mime_type, url)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&prompt.id)
            .bind(position as i64)
            .bind(&attachment.file_name)
            .bind(i64::try_from(attachment.file_size).unwrap_or(i64::MAX))
            .bind(&attachment.mime_type)
            .bind(&attachment.url)
            .execute(&mut *tx)
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to save attachment: {}", e)))?;
        }

        sqlx::query("UPDATE conversations SET last_active_at = MAX(last_active_at, ?) WHERE id = ?")
            .bind(prompt.created_at.timestamp_millis())
            .bind(&prompt.conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to touch conversation: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to commit prompt: {}", e)))?;

        debug!(
            prompt_id = %prompt.id,
            turn_id = %placement.turn_id,
            ordinal = placement.ordinal,
            new_turn = placement.new_turn,
            "Stored prompt"
        );
        Ok(placement)
    }

    /// Load one prompt with its attachments
    pub async fn find_prompt(&self, id: &str) -> Result<PromptRecord> {
        let row = sqlx::query(
            "SELECT id, conversation_id, previous_prompt_id, text, created_at
             FROM prompts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to load prompt: {}", e)))?
        .ok_or_else(|| ThreadlineError::NotFound(format!("Prompt {}", id)))?;

        let mut prompt = prompt_from_row(&row);

        let rows = sqlx::query(
            "SELECT prompt_id, file_name, file_size, mime_type, url
             FROM prompt_attachments WHERE prompt_id = ? ORDER BY position",
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to load attachments: {}", e)))?;

        prompt.attachments = rows.iter().map(attachment_from_row).collect();
        Ok(prompt)
    }

    /// Snapshot of every turn in a conversation, ordered by ordinal.
    ///
    /// Prompts and responses appear in insertion order inside each turn.
    pub async fn load_turns(&self, conversation_id: &str) -> Result<Vec<TurnLog>> {
        let pool = self.db.pool();

        let turn_rows = sqlx::query(
            "SELECT id, conversation_id, ordinal FROM turns
             WHERE conversation_id = ? ORDER BY ordinal",
        )
        .bind(conversation_id)
        .fetch_all(pool)
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to load turns: {}", e)))?;

        let prompt_rows = sqlx::query(
            "SELECT id, turn_id, conversation_id, previous_prompt_id, text, created_at
             FROM prompts WHERE conversation_id = ? ORDER BY created_at, rowid",
        )
        .bind(conversation_id)
        .fetch_all(pool)
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to load prompts: {}", e)))?;

        let attachment_rows = sqlx::query(
            "SELECT a.prompt_id, a.file_name, a.file_size, a.mime_type, a.url
             FROM prompt_attachments a JOIN prompts p ON a.prompt_id = p.id
             WHERE p.conversation_id = ? ORDER BY a.prompt_id, a.position",
        )
        .bind(conversation_id)
        .fetch_all(pool)
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to load attachments: {}", e)))?;

        let mut attachments: HashMap<String, Vec<Attachment>> = HashMap::new();
        for row in &attachment_rows {
            attachments
                .entry(row.get("prompt_id"))
                .or_default()
                .push(attachment_from_row(row));
        }

        let mut turns: Vec<TurnLog> = turn_rows
            .iter()
            .map(|row| {
                TurnLog::new(row.get::<String, _>("conversation_id"), row.get::<i64, _>("ordinal"))
                    .with_id(row.get::<String, _>("id"))
            })
            .collect();
        let index: HashMap<String, usize> = turns
            .iter()
            .enumerate()
            .map(|(i, turn)| (turn.id.clone(), i))
            .collect();

        let mut prompt_turn: HashMap<String, usize> = HashMap::new();
        for row in &prompt_rows {
            let turn_id: String = row.get("turn_id");
            let Some(&slot) = index.get(&turn_id) else {
                continue;
            };
            let mut prompt = prompt_from_row(row);
            prompt.attachments = attachments.remove(&prompt.id).unwrap_or_default();
            prompt_turn.insert(prompt.id.clone(), slot);
            turns[slot].prompts.push(prompt);
        }

        for response in load_responses_for_conversation(pool, conversation_id).await? {
            if let Some(&slot) = prompt_turn.get(&response.prompt_id) {
                turns[slot].responses.push(response);
            }
        }

        Ok(turns)
    }
}

/// Turn holding `previous_prompt_id`, which must belong to the same conversation
async fn join_turn(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    previous_prompt_id: &str,
) -> Result<PromptPlacement> {
    let row = sqlx::query(
        "SELECT t.id, t.ordinal FROM prompts p JOIN turns t ON p.turn_id = t.id
         WHERE p.id = ? AND p.conversation_id = ?",
    )
    .bind(previous_prompt_id)
    .bind(conversation_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| ThreadlineError::Database(format!("Failed to find edited prompt: {}", e)))?
    .ok_or_else(|| {
        ThreadlineError::NotFound(format!(
            "Prompt {} in conversation {}",
            previous_prompt_id, conversation_id
        ))
    })?;

    Ok(PromptPlacement {
        turn_id: row.get("id"),
        ordinal: row.get("ordinal"),
        new_turn: false,
    })
}

/// Create the next turn and bump the conversation's turn counter
async fn open_turn(conn: &mut SqliteConnection, conversation_id: &str, at: i64) -> Result<PromptPlacement> {
    let result = sqlx::query("UPDATE conversations SET turn_count = turn_count + 1 WHERE id = ?")
        .bind(conversation_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to count turn: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(ThreadlineError::NotFound(format!("Conversation {}", conversation_id)));
    }

    let turn_id = Uuid::new_v4().to_string();
    // Drain the RETURNING rows so the insert runs to completion
    let ordinals: Vec<i64> = sqlx::query_scalar(
        "INSERT INTO turns (id, conversation_id, ordinal, created_at)
         SELECT ?, ?, COALESCE(MAX(ordinal), 0) + 1, ? FROM turns WHERE conversation_id = ?
         RETURNING ordinal",
    )
    .bind(&turn_id)
    .bind(conversation_id)
    .bind(at)
    .bind(conversation_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| ThreadlineError::Database(format!("Failed to create turn: {}", e)))?;
    let ordinal = ordinals
        .first()
        .copied()
        .ok_or_else(|| ThreadlineError::Database("Turn insert returned no ordinal".to_string()))?;

    Ok(PromptPlacement {
        turn_id,
        ordinal,
        new_turn: true,
    })
}

fn prompt_from_row(row: &SqliteRow) -> PromptRecord {
    PromptRecord {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        previous_prompt_id: row.get("previous_prompt_id"),
        text: row.get("text"),
        attachments: Vec::new(),
        created_at: from_millis(row.get("created_at")),
    }
}

fn attachment_from_row(row: &SqliteRow) -> Attachment {
    Attachment {
        file_name: row.get("file_name"),
        file_size: u64::try_from(row.get::<i64, _>("file_size")).unwrap_or_default(),
        mime_type: row.get("mime_type"),
        url: row.get("url"),
    }
}
