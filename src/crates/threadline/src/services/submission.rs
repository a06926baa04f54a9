//! Prompt submission requests and their validation

use crate::config::LimitsConfig;
use crate::error::{Result, ThreadlineError};
use thread_context::Attachment;

/// A prompt as sent by a user, before it is stored
#[derive(Debug, Clone, Default)]
pub struct PromptSubmission {
    pub user_id: String,
    /// Existing conversation; `None` starts a new one
    pub conversation_id: Option<String>,
    pub text: String,
    pub attachments: Vec<Attachment>,
    /// Set when this prompt edits an earlier one
    pub previous_prompt_id: Option<String>,
}

impl PromptSubmission {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn editing(mut self, previous_prompt_id: impl Into<String>) -> Self {
        self.previous_prompt_id = Some(previous_prompt_id.into());
        self
    }
}

/// Checks submissions against the configured limits
#[derive(Debug, Clone)]
pub struct SubmissionValidator {
    limits: LimitsConfig,
}

impl SubmissionValidator {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    pub fn validate(&self, submission: &PromptSubmission) -> Result<()> {
        if submission.user_id.trim().is_empty() {
            return Err(ThreadlineError::Validation("User id is required".to_string()));
        }

        if submission.text.trim().is_empty() && submission.attachments.is_empty() {
            return Err(ThreadlineError::Validation(
                "Prompt needs text or at least one attachment".to_string(),
            ));
        }

        if submission.previous_prompt_id.is_some() && submission.conversation_id.is_none() {
            return Err(ThreadlineError::Validation(
                "An edit must name its conversation".to_string(),
            ));
        }

        if submission.attachments.len() > self.limits.max_attachments {
            return Err(ThreadlineError::Validation(format!(
                "Too many attachments: {} (max {})",
                submission.attachments.len(),
                self.limits.max_attachments
            )));
        }

        for attachment in &submission.attachments {
            for (field, value) in [
                ("file name", &attachment.file_name),
                ("url", &attachment.url),
                ("MIME type", &attachment.mime_type),
            ] {
                if value.trim().is_empty() {
                    return Err(ThreadlineError::Validation(format!(
                        "Attachment is missing its {}",
                        field
                    )));
                }
            }
        }

        let total: u64 = submission
            .attachments
            .iter()
            .fold(0u64, |sum, a| sum.saturating_add(a.file_size));
        if total > self.limits.max_total_attachment_bytes {
            return Err(ThreadlineError::Validation(format!(
                "Attachments total {} bytes (max {})",
                total, self.limits.max_total_attachment_bytes
            )));
        }

        Ok(())
    }
}

impl Default for SubmissionValidator {
    fn default() -> Self {
        Self::new(LimitsConfig::default())
    }
}
