//! Context assembly for a model call
//!
//! history (minus the live prompt) → memory facts → live user message →
//! trim → system preamble.

use crate::error::Result;
use crate::memory::MemoryInjector;
use crate::message::ContextMessage;
use crate::models::DEFAULT_RESPONSE_RESERVE;
use crate::reconstruct::ThreadReconstructor;
use crate::records::{PromptRecord, TurnLog};
use crate::trimmer::ContextTrimmer;
use std::sync::Arc;
use tracing::info;

/// How full the history budget is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WarningLevel {
    /// Below 50%
    None,
    /// 50-70%
    Low,
    /// 70-85%
    Medium,
    /// 85-95%
    High,
    /// 95% and above
    Critical,
}

/// Token usage of an assembled context
#[derive(Debug, Clone, PartialEq)]
pub struct ContextUsage {
    pub used: usize,
    pub budget: usize,
    pub context_window: usize,
    pub percentage: f64,
    pub warning_level: WarningLevel,
}

impl ContextUsage {
    pub fn new(used: usize, budget: usize, context_window: usize) -> Self {
        let percentage = if budget == 0 {
            100.0
        } else {
            (used as f64 / budget as f64) * 100.0
        };

        let warning_level = if percentage >= 95.0 {
            WarningLevel::Critical
        } else if percentage >= 85.0 {
            WarningLevel::High
        } else if percentage >= 70.0 {
            WarningLevel::Medium
        } else if percentage >= 50.0 {
            WarningLevel::Low
        } else {
            WarningLevel::None
        };

        Self {
            used,
            budget,
            context_window,
            percentage,
            warning_level,
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self.warning_level, WarningLevel::Critical)
    }
}

/// Inputs for one assembly
#[derive(Debug, Clone)]
pub struct ContextRequest<'a> {
    pub model_id: &'a str,
    pub user_id: &'a str,
    /// Snapshot of the conversation's turns, including the live prompt's turn
    pub turns: &'a [TurnLog],
    /// Already-persisted prompt being answered
    pub live_prompt: &'a PromptRecord,
    pub response_reserve: usize,
}

impl<'a> ContextRequest<'a> {
    pub fn new(
        model_id: &'a str,
        user_id: &'a str,
        turns: &'a [TurnLog],
        live_prompt: &'a PromptRecord,
    ) -> Self {
        Self {
            model_id,
            user_id,
            turns,
            live_prompt,
            response_reserve: DEFAULT_RESPONSE_RESERVE,
        }
    }

    pub fn with_reserve(mut self, response_reserve: usize) -> Self {
        self.response_reserve = response_reserve;
        self
    }
}

/// Messages ready for a model call
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// Fixed preamble, outside the trimmed budget
    pub system_prompt: Option<String>,
    /// Trimmed history, facts and live message
    pub messages: Vec<ContextMessage>,
    /// Messages dropped by trimming
    pub dropped: usize,
    /// Memory facts injected before trimming
    pub facts: usize,
    pub usage: ContextUsage,
}

impl AssembledContext {
    /// Preamble followed by the trimmed messages
    pub fn to_messages(&self) -> Vec<ContextMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(preamble) = &self.system_prompt {
            out.push(ContextMessage::system(preamble.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }
}

/// Builds bounded contexts from turn snapshots
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    trimmer: Arc<ContextTrimmer>,
    reconstructor: ThreadReconstructor,
    memory: MemoryInjector,
    system_prompt: Option<String>,
}

impl ContextAssembler {
    pub fn new(trimmer: Arc<ContextTrimmer>, reconstructor: ThreadReconstructor, memory: MemoryInjector) -> Self {
        Self {
            trimmer,
            reconstructor,
            memory,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        let prompt = system_prompt.into();
        self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }

    pub fn trimmer(&self) -> &ContextTrimmer {
        &self.trimmer
    }

    pub fn memory(&self) -> &MemoryInjector {
        &self.memory
    }

    pub fn reconstructor(&self) -> &ThreadReconstructor {
        &self.reconstructor
    }

    pub async fn assemble(&self, request: ContextRequest<'_>) -> Result<AssembledContext> {
        // Fail fast on an unknown model before any network call
        let window = self.trimmer.models().get(request.model_id)?.context_window;

        let mut messages = self
            .reconstructor
            .reconstruct(request.turns, Some(&request.live_prompt.id))
            .await?;

        let facts = self
            .memory
            .facts(&request.live_prompt.text, request.user_id)
            .await;
        let fact_count = facts.len();
        messages.extend(facts);

        if let Some(live) = self.reconstructor.user_message(request.live_prompt).await? {
            messages.push(live);
        }

        let trimmed = self
            .trimmer
            .trim_detailed(request.model_id, &messages, request.response_reserve)?;

        info!(
            model = %request.model_id,
            prompt_id = %request.live_prompt.id,
            messages = trimmed.messages.len(),
            dropped = trimmed.dropped,
            facts = fact_count,
            tokens = trimmed.total_tokens,
            "Assembled context"
        );

        Ok(AssembledContext {
            system_prompt: self.system_prompt.clone(),
            usage: ContextUsage::new(trimmed.total_tokens, trimmed.budget, window),
            messages: trimmed.messages,
            dropped: trimmed.dropped,
            facts: fact_count,
        })
    }
}
