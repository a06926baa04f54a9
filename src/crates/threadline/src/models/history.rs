//! History view: the current branch of a conversation

use super::Conversation;
use serde::{Deserialize, Serialize};
use thread_context::{PromptRecord, ResponseRecord, ResponseState, TurnLog};

/// One turn as shown to the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnView {
    pub turn_id: String,
    pub ordinal: i64,
    /// Current (latest) prompt edit
    pub prompt: Option<PromptRecord>,
    /// Number of superseded edits behind the current prompt
    pub earlier_edits: usize,
    /// Current response with every version and its feedback
    pub response: Option<ResponseRecord>,
}

impl TurnView {
    /// Whether the current prompt has at least one generated version
    pub fn is_answered(&self) -> bool {
        matches!(
            self.response.as_ref().map(ResponseRecord::state),
            Some(ResponseState::Versioned(_))
        )
    }
}

impl From<&TurnLog> for TurnView {
    fn from(turn: &TurnLog) -> Self {
        Self {
            turn_id: turn.id.clone(),
            ordinal: turn.ordinal,
            prompt: turn.current_prompt().cloned(),
            earlier_edits: turn.prompts.len().saturating_sub(1),
            response: turn.current_response().cloned(),
        }
    }
}

/// A conversation with its turns in ordinal order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub conversation: Conversation,
    pub turns: Vec<TurnView>,
}

impl ConversationHistory {
    pub fn new(conversation: Conversation, turns: &[TurnLog]) -> Self {
        let mut turns: Vec<TurnView> = turns.iter().map(TurnView::from).collect();
        turns.sort_by_key(|t| t.ordinal);
        Self {
            conversation,
            turns,
        }
    }
}
