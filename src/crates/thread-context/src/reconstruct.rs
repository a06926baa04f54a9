//! Thread reconstruction
//!
//! Flattens persisted turn logs into the linear "latest" conversation: one
//! user message per turn (its current prompt) followed by the current
//! version of its current response.

use crate::error::Result;
use crate::message::{ContentPart, ContextMessage, FileData};
use crate::records::{Attachment, PromptRecord, TurnLog};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns an attachment into content the model can read
#[async_trait]
pub trait FileResolver: Send + Sync {
    async fn resolve(&self, attachment: &Attachment) -> Result<FileData>;
}

/// Resolver that hands every attachment to the model as a URL reference
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceResolver;

#[async_trait]
impl FileResolver for ReferenceResolver {
    async fn resolve(&self, attachment: &Attachment) -> Result<FileData> {
        Ok(FileData::Url(attachment.url.clone()))
    }
}

/// Builds context messages from turn logs
#[derive(Clone)]
pub struct ThreadReconstructor {
    resolver: Arc<dyn FileResolver>,
}

impl ThreadReconstructor {
    pub fn new(resolver: Arc<dyn FileResolver>) -> Self {
        Self { resolver }
    }

    /// Reconstructor that never fetches file contents
    pub fn by_reference() -> Self {
        Self::new(Arc::new(ReferenceResolver))
    }

    /// Reconstruct the latest thread.
    ///
    /// Turns are ordered by ordinal. A turn whose current prompt is
    /// `exclude_prompt_id` is skipped entirely.
    pub async fn reconstruct(
        &self,
        turns: &[TurnLog],
        exclude_prompt_id: Option<&str>,
    ) -> Result<Vec<ContextMessage>> {
        let mut ordered: Vec<&TurnLog> = turns.iter().collect();
        ordered.sort_by_key(|turn| turn.ordinal);

        let mut messages = Vec::with_capacity(ordered.len() * 2);

        for turn in ordered {
            let Some(prompt) = turn.current_prompt() else {
                continue;
            };

            if exclude_prompt_id == Some(prompt.id.as_str()) {
                debug!(turn_id = %turn.id, prompt_id = %prompt.id, "Excluding live prompt from history");
                continue;
            }

            if let Some(user) = self.user_message(prompt).await? {
                messages.push(user);
            }

            let answer = turn
                .current_response()
                .and_then(|response| {
                    response
                        .current_version()
                        .map(|version| (response.id.as_str(), version.text.as_str()))
                })
                .filter(|(_, text)| !text.trim().is_empty());

            if let Some((response_id, text)) = answer {
                messages.push(ContextMessage::assistant(text).with_id(response_id));
            }
        }

        Ok(messages)
    }

    /// User message for one prompt, or `None` when it has neither text nor
    /// attachments.
    pub async fn user_message(&self, prompt: &PromptRecord) -> Result<Option<ContextMessage>> {
        if prompt.attachments.is_empty() {
            if !prompt.has_text() {
                return Ok(None);
            }
            return Ok(Some(
                ContextMessage::user(prompt.text.clone()).with_id(prompt.id.clone()),
            ));
        }

        let mut parts = Vec::with_capacity(prompt.attachments.len() + 1);
        if prompt.has_text() {
            parts.push(ContentPart::text(prompt.text.clone()));
        }
        for attachment in &prompt.attachments {
            parts.push(self.file_part(attachment).await);
        }

        Ok(Some(ContextMessage::user(parts).with_id(prompt.id.clone())))
    }

    async fn file_part(&self, attachment: &Attachment) -> ContentPart {
        let data = match self.resolver.resolve(attachment).await {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    file = %attachment.file_name,
                    url = %attachment.url,
                    error = %e,
                    "File resolution failed; falling back to URL reference"
                );
                FileData::Url(attachment.url.clone())
            }
        };

        ContentPart::File {
            name: attachment.file_name.clone(),
            mime_type: attachment.mime_type.clone(),
            data,
        }
    }
}

impl Default for ThreadReconstructor {
    fn default() -> Self {
        Self::by_reference()
    }
}

impl std::fmt::Debug for ThreadReconstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadReconstructor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContextError;
    use crate::message::{MessageContent, Role};
    use crate::records::{ResponseRecord, ResponseVersion};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn answered(ordinal: i64, prompt: &str, answer: &str) -> TurnLog {
        let prompt_id = format!("p{}", ordinal);
        let mut response = ResponseRecord::pending(prompt_id.clone()).with_id(format!("r{}", ordinal));
        response.append_version(ResponseVersion::new(answer, "gpt-4o"));
        TurnLog::new("c1", ordinal)
            .with_prompt(PromptRecord::new("c1", prompt).with_id(prompt_id).created_at(at(ordinal)))
            .with_response(response)
    }

    struct FailingResolver;

    #[async_trait]
    impl FileResolver for FailingResolver {
        async fn resolve(&self, attachment: &Attachment) -> Result<FileData> {
            Err(ContextError::FileResolution(format!("404 for {}", attachment.url)))
        }
    }

    #[tokio::test]
    async fn test_orders_by_ordinal() {
        let turns = vec![answered(2, "second", "b"), answered(1, "first", "a")];
        let messages = ThreadReconstructor::default().reconstruct(&turns, None).await.unwrap();

        let texts: Vec<_> = messages.iter().map(|m| m.text().unwrap()).collect();
        assert_eq!(texts, vec!["first", "a", "second", "b"]);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_uses_latest_edit_and_last_version() {
        let mut response = ResponseRecord::pending("p1b").with_id("r1");
        response.append_version(ResponseVersion::new("draft", "gpt-4"));
        response.append_version(ResponseVersion::new("final", "gpt-4"));

        let turn = TurnLog::new("c1", 1)
            .with_prompt(PromptRecord::new("c1", "original").with_id("p1a").created_at(at(1)))
            .with_prompt(
                PromptRecord::new("c1", "edited")
                    .with_id("p1b")
                    .superseding("p1a")
                    .created_at(at(2)),
            )
            .with_response(response);

        let messages = ThreadReconstructor::default().reconstruct(&[turn], None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), Some("edited"));
        assert_eq!(messages[1].text(), Some("final"));
    }

    #[tokio::test]
    async fn test_excludes_live_prompt_turn() {
        let turns = vec![answered(1, "first", "a"), answered(2, "live", "old answer")];
        let messages = ThreadReconstructor::default()
            .reconstruct(&turns, Some("p2"))
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text(), Some("a"));
    }

    #[tokio::test]
    async fn test_unanswered_and_blank_answers_skip_assistant() {
        let pending = TurnLog::new("c1", 1)
            .with_prompt(PromptRecord::new("c1", "hello").with_id("p1"))
            .with_response(ResponseRecord::pending("p1"));
        let blank = answered(2, "again", "   ");

        let messages = ThreadReconstructor::default()
            .reconstruct(&[pending, blank], None)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.role == Role::User));
    }

    #[tokio::test]
    async fn test_attachment_only_prompt_has_single_file_part() {
        let prompt = PromptRecord::new("c1", "  ")
            .with_id("p1")
            .with_attachment(Attachment::new("cat.png", 10, "image/png", "https://cdn/cat.png"));
        let turn = TurnLog::new("c1", 1).with_prompt(prompt);

        let messages = ThreadReconstructor::default().reconstruct(&[turn], None).await.unwrap();
        assert_eq!(messages.len(), 1);

        let parts = messages[0].content.parts().unwrap();
        assert_eq!(parts.len(), 1);
        assert!(matches!(
            &parts[0],
            ContentPart::File { data: FileData::Url(url), .. } if url == "https://cdn/cat.png"
        ));
    }

    #[tokio::test]
    async fn test_text_part_precedes_files() {
        let prompt = PromptRecord::new("c1", "summarise")
            .with_attachment(Attachment::new("a.pdf", 10, "application/pdf", "https://cdn/a.pdf"))
            .with_attachment(Attachment::new("b.txt", 10, "text/plain", "https://cdn/b.txt"));

        let message = ThreadReconstructor::default()
            .user_message(&prompt)
            .await
            .unwrap()
            .unwrap();
        let parts = message.content.parts().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], ContentPart::text("summarise"));
        assert!(!parts[1].is_text());
        assert!(!parts[2].is_text());
    }

    #[tokio::test]
    async fn test_empty_prompt_skipped_but_answer_kept() {
        let mut response = ResponseRecord::pending("p1");
        response.append_version(ResponseVersion::new("answer", "gpt-4"));
        let turn = TurnLog::new("c1", 1)
            .with_prompt(PromptRecord::new("c1", "").with_id("p1"))
            .with_response(response);

        let messages = ThreadReconstructor::default().reconstruct(&[turn], None).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_resolution_failure_falls_back_to_url() {
        let prompt = PromptRecord::new("c1", "read this")
            .with_attachment(Attachment::new("notes.txt", 5, "text/plain", "https://cdn/notes.txt"));
        let reconstructor = ThreadReconstructor::new(Arc::new(FailingResolver));

        let message = reconstructor.user_message(&prompt).await.unwrap().unwrap();
        let MessageContent::Parts(parts) = message.content else {
            panic!("expected multi-part content");
        };
        assert!(matches!(
            &parts[1],
            ContentPart::File { data: FileData::Url(url), .. } if url == "https://cdn/notes.txt"
        ));
    }

    #[tokio::test]
    async fn test_stable_across_calls() {
        let turns = vec![answered(1, "a", "b"), answered(2, "c", "d"), answered(3, "e", "f")];
        let reconstructor = ThreadReconstructor::default();
        let first = reconstructor.reconstruct(&turns, None).await.unwrap();
        let second = reconstructor.reconstruct(&turns, None).await.unwrap();
        assert_eq!(first, second);
    }
}
