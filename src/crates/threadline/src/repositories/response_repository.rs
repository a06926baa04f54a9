//! Response repository: response records, versions and feedback

use crate::db::{Database, DatabasePool};
use crate::error::{Result, ThreadlineError};
use crate::models::from_millis;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use thread_context::{Feedback, ResponseRecord, ResponseState, ResponseVersion};
use tracing::info;

/// Repository for response records
#[derive(Clone, Debug)]
pub struct ResponseRepository {
    db: Arc<Database>,
}

impl ResponseRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Save a response record; versions are stored separately by `append_version`
    pub async fn create(&self, response: &ResponseRecord) -> Result<()> {
        sqlx::query("INSERT INTO responses (id, prompt_id, feedback, created_at) VALUES (?, ?, ?, ?)")
            .bind(&response.id)
            .bind(&response.prompt_id)
            .bind(response.feedback.as_str())
            .bind(response.created_at.timestamp_millis())
            .execute(self.db.pool())
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to create response: {}", e)))?;

        Ok(())
    }

    /// Load a response with all of its versions
    pub async fn find_by_id(&self, id: &str) -> Result<ResponseRecord> {
        let row = sqlx::query("SELECT id, prompt_id, feedback, created_at FROM responses WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to load response: {}", e)))?
            .ok_or_else(|| ThreadlineError::NotFound(format!("Response {}", id)))?;

        let mut response = response_from_row(&row)?;

        let rows = sqlx::query(
            "SELECT response_id, text, model, created_at FROM response_versions
             WHERE response_id = ? ORDER BY position",
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to load versions: {}", e)))?;

        response.versions = rows.iter().map(version_from_row).collect();
        Ok(response)
    }

    /// Append a version and return the response's new state.
    ///
    /// The position is computed inside the insert, so concurrent appends to
    /// the same response never share a slot.
    pub async fn append_version(&self, response_id: &str, version: &ResponseVersion) -> Result<ResponseState> {
        // Committed before returning, so every pool connection sees the version
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to start transaction: {}", e)))?;

        // Drain the RETURNING rows so the insert runs to completion
        let positions: Vec<i64> = sqlx::query_scalar(
            "INSERT INTO response_versions (response_id, position, text, model, created_at)
             SELECT ?, COALESCE(MAX(position), -1) + 1, ?, ?, ?
             FROM response_versions WHERE response_id = ?
             RETURNING position",
        )
        .bind(response_id)
        .bind(&version.text)
        .bind(&version.model)
        .bind(version.created_at.timestamp_millis())
        .bind(response_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| ThreadlineError::Database(format!("Failed to append version: {}", e)))?;
        let position = positions
            .first()
            .copied()
            .ok_or_else(|| ThreadlineError::Database("Version insert returned no position".to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to commit version: {}", e)))?;

        let count = usize::try_from(position + 1).unwrap_or_default();
        info!(response_id = %response_id, version = count, model = %version.model, "Appended response version");
        Ok(ResponseState::Versioned(count))
    }

    /// Set feedback on a response that has at least one version
    pub async fn set_feedback(&self, response_id: &str, feedback: Feedback) -> Result<()> {
        let mut response = self.find_by_id(response_id).await?;
        response.set_feedback(feedback)?;

        sqlx::query("UPDATE responses SET feedback = ? WHERE id = ?")
            .bind(feedback.as_str())
            .bind(response_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to set feedback: {}", e)))?;

        Ok(())
    }
}

/// Every response of a conversation with its versions, in insertion order
pub(crate) async fn load_responses_for_conversation(
    pool: &DatabasePool,
    conversation_id: &str,
) -> Result<Vec<ResponseRecord>> {
    let rows = sqlx::query(
        "SELECT r.id, r.prompt_id, r.feedback, r.created_at
         FROM responses r JOIN prompts p ON r.prompt_id = p.id
         WHERE p.conversation_id = ? ORDER BY r.created_at, r.rowid",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await
    .map_err(|e| ThreadlineError::Database(format!("Failed to load responses: {}", e)))?;

    let version_rows = sqlx::query(
        "SELECT v.response_id, v.text, v.model, v.created_at
         FROM response_versions v
         JOIN responses r ON v.response_id = r.id
         JOIN prompts p ON r.prompt_id = p.id
         WHERE p.conversation_id = ? ORDER BY v.response_id, v.position",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await
    .map_err(|e| ThreadlineError::Database(format!("Failed to load versions: {}", e)))?;

    let mut versions: HashMap<String, Vec<ResponseVersion>> = HashMap::new();
    for row in &version_rows {
        versions
            .entry(row.get("response_id"))
            .or_default()
            .push(version_from_row(row));
    }

    rows.iter()
        .map(|row| {
            let mut response = response_from_row(row)?;
            response.versions = versions.remove(&response.id).unwrap_or_default();
            Ok(response)
        })
        .collect()
}

fn response_from_row(row: &SqliteRow) -> Result<ResponseRecord> {
    let feedback: String = row.get("feedback");
    Ok(ResponseRecord {
        id: row.get("id"),
        prompt_id: row.get("prompt_id"),
        versions: Vec::new(),
        feedback: feedback
            .parse()
            .map_err(|e| ThreadlineError::Database(format!("Corrupt feedback value: {}", e)))?,
        created_at: from_millis(row.get("created_at")),
    })
}

fn version_from_row(row: &SqliteRow) -> ResponseVersion {
    ResponseVersion {
        text: row.get("text"),
        model: row.get("model"),
        created_at: from_millis(row.get("created_at")),
    }
}
