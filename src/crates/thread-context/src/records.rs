//! Persisted conversation records
//!
//! A turn is an append-only log of immutable prompt records (edits) and
//! response records (one per generation request). Nothing is ever mutated in
//! place except a response's version list, which only grows. The "current"
//! prompt and response are resolved on read by creation time.

use crate::error::{ContextError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file attached to a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub url: String,
}

impl Attachment {
    pub fn new(
        file_name: impl Into<String>,
        file_size: u64,
        mime_type: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            mime_type: mime_type.into(),
            url: url.into(),
        }
    }

    /// Primary MIME type (`image` for `image/png`), lowercased
    pub fn primary_type(&self) -> String {
        self.mime_type
            .split('/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

/// A user prompt. Editing creates a new record that points back at this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: String,
    pub conversation_id: String,
    /// Weak reference to the prompt this one supersedes
    pub previous_prompt_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl PromptRecord {
    pub fn new(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            previous_prompt_id: None,
            text: text.into(),
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn superseding(mut self, previous_prompt_id: impl Into<String>) -> Self {
        self.previous_prompt_id = Some(previous_prompt_id.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Text is present once surrounding whitespace is ignored
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Whether the prompt carries anything a model could read
    pub fn has_content(&self) -> bool {
        self.has_text() || !self.attachments.is_empty()
    }
}

/// One generation attempt for a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseVersion {
    pub text: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl ResponseVersion {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            created_at: Utc::now(),
        }
    }
}

/// User feedback on a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
    #[default]
    Unset,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Unset => "unset",
        }
    }
}

impl std::fmt::Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Feedback {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "positive" | "good" | "up" => Ok(Self::Positive),
            "negative" | "bad" | "down" => Ok(Self::Negative),
            "unset" | "neutral" | "none" => Ok(Self::Unset),
            other => Err(format!("Invalid feedback: {}", other)),
        }
    }
}

/// Persisted lifecycle state of a response record.
///
/// `Streaming` is not stored; callers track an in-flight generation themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseState {
    Pending,
    Versioned(usize),
}

/// A response to one prompt, versioned by regeneration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: String,
    pub prompt_id: String,
    #[serde(default)]
    pub versions: Vec<ResponseVersion>,
    #[serde(default)]
    pub feedback: Feedback,
    pub created_at: DateTime<Utc>,
}

impl ResponseRecord {
    /// New record with no versions
    pub fn pending(prompt_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt_id: prompt_id.into(),
            versions: Vec::new(),
            feedback: Feedback::Unset,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn state(&self) -> ResponseState {
        match self.versions.len() {
            0 => ResponseState::Pending,
            n => ResponseState::Versioned(n),
        }
    }

    /// Record a new generation. Earlier versions are kept.
    pub fn append_version(&mut self, version: ResponseVersion) -> ResponseState {
        self.versions.push(version);
        self.state()
    }

    /// The last version, if any
    pub fn current_version(&self) -> Option<&ResponseVersion> {
        self.versions.last()
    }

    /// Set feedback; only allowed once something has been generated
    pub fn set_feedback(&mut self, feedback: Feedback) -> Result<()> {
        if self.versions.is_empty() {
            return Err(ContextError::NoVersions(self.id.clone()));
        }
        self.feedback = feedback;
        Ok(())
    }
}

/// All records of one turn, in insertion order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnLog {
    pub id: String,
    pub conversation_id: String,
    pub ordinal: i64,
    #[serde(default)]
    pub prompts: Vec<PromptRecord>,
    #[serde(default)]
    pub responses: Vec<ResponseRecord>,
}

impl TurnLog {
    pub fn new(conversation_id: impl Into<String>, ordinal: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            ordinal,
            prompts: Vec::new(),
            responses: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_prompt(mut self, prompt: PromptRecord) -> Self {
        self.prompts.push(prompt);
        self
    }

    pub fn with_response(mut self, response: ResponseRecord) -> Self {
        self.responses.push(response);
        self
    }

    /// Latest prompt by creation time; equal timestamps go to the later insert
    pub fn current_prompt(&self) -> Option<&PromptRecord> {
        latest_by(&self.prompts, |p| p.created_at)
    }

    /// Latest response to the current prompt by creation time
    pub fn current_response(&self) -> Option<&ResponseRecord> {
        let prompt = self.current_prompt()?;
        let candidates: Vec<&ResponseRecord> = self
            .responses
            .iter()
            .filter(|r| r.prompt_id == prompt.id)
            .collect();
        latest_by(&candidates, |r| r.created_at).copied()
    }
}

fn latest_by<T, F>(items: &[T], key: F) -> Option<&T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.iter().fold(None, |best: Option<&T>, item| match best {
        Some(current) if key(current) > key(item) => Some(current),
        _ => Some(item),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_current_prompt_latest_timestamp() {
        let turn = TurnLog::new("c1", 1)
            .with_prompt(PromptRecord::new("c1", "second").with_id("p2").created_at(at(20)))
            .with_prompt(PromptRecord::new("c1", "first").with_id("p1").created_at(at(10)));

        assert_eq!(turn.current_prompt().unwrap().id, "p2");
    }

    #[test]
    fn test_current_prompt_tie_goes_to_last_insert() {
        let turn = TurnLog::new("c1", 1)
            .with_prompt(PromptRecord::new("c1", "a").with_id("p1").created_at(at(5)))
            .with_prompt(PromptRecord::new("c1", "b").with_id("p2").created_at(at(5)));

        assert_eq!(turn.current_prompt().unwrap().id, "p2");
    }

    #[test]
    fn test_current_response_follows_current_prompt() {
        let turn = TurnLog::new("c1", 1)
            .with_prompt(PromptRecord::new("c1", "old").with_id("p1").created_at(at(1)))
            .with_prompt(PromptRecord::new("c1", "new").with_id("p2").created_at(at(2)))
            .with_response(ResponseRecord::pending("p1").with_id("r1").created_at(at(9)))
            .with_response(ResponseRecord::pending("p2").with_id("r2").created_at(at(3)))
            .with_response(ResponseRecord::pending("p2").with_id("r3").created_at(at(4)));

        assert_eq!(turn.current_response().unwrap().id, "r3");
    }

    #[test]
    fn test_no_response_for_edited_prompt() {
        let turn = TurnLog::new("c1", 1)
            .with_prompt(PromptRecord::new("c1", "old").with_id("p1").created_at(at(1)))
            .with_prompt(PromptRecord::new("c1", "new").with_id("p2").created_at(at(2)))
            .with_response(ResponseRecord::pending("p1").with_id("r1"));

        assert!(turn.current_response().is_none());
    }

    #[test]
    fn test_version_state_machine() {
        let mut response = ResponseRecord::pending("p1");
        assert_eq!(response.state(), ResponseState::Pending);
        assert!(response.current_version().is_none());

        assert!(matches!(
            response.set_feedback(Feedback::Positive),
            Err(ContextError::NoVersions(_))
        ));

        assert_eq!(
            response.append_version(ResponseVersion::new("one", "gpt-4")),
            ResponseState::Versioned(1)
        );
        assert_eq!(
            response.append_version(ResponseVersion::new("two", "gpt-4o")),
            ResponseState::Versioned(2)
        );
        assert_eq!(response.current_version().unwrap().text, "two");
        assert_eq!(response.versions[0].text, "one");

        response.set_feedback(Feedback::Negative).unwrap();
        response.set_feedback(Feedback::Positive).unwrap();
        assert_eq!(response.feedback, Feedback::Positive);
    }

    #[test]
    fn test_feedback_parsing() {
        assert_eq!("GOOD".parse::<Feedback>().unwrap(), Feedback::Positive);
        assert_eq!("bad".parse::<Feedback>().unwrap(), Feedback::Negative);
        assert_eq!("neutral".parse::<Feedback>().unwrap(), Feedback::Unset);
        assert!("meh".parse::<Feedback>().is_err());
    }

    #[test]
    fn test_prompt_content_checks() {
        let blank = PromptRecord::new("c1", "   ");
        assert!(!blank.has_text());
        assert!(!blank.has_content());

        let with_file = blank.with_attachment(Attachment::new("a.txt", 3, "text/plain", "https://x/a.txt"));
        assert!(with_file.has_content());
        assert_eq!(with_file.attachments[0].primary_type(), "text");
    }
}
