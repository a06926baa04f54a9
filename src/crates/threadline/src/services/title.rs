//! Conversation titles from the first message

use crate::models::DEFAULT_TITLE;
use llm::{ChatModel, ChatRequest};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use thread_context::ContextMessage;
use tracing::{debug, error, warn};

/// Characters of the first message sent to the title model
const TITLE_INPUT_CHARS: usize = 200;
const TITLE_MAX_TOKENS: usize = 15;
const TITLE_TEMPERATURE: f32 = 0.2;
const TITLE_MAX_WORDS: usize = 5;
const FALLBACK_WORDS: usize = 3;
/// Extra attempts after a retryable failure
const TITLE_RETRIES: usize = 1;

/// Generates short titles with a model call, falling back to a heuristic
#[derive(Clone)]
pub struct TitleGenerator {
    chat: Arc<dyn ChatModel>,
    model: String,
}

impl TitleGenerator {
    pub fn new(chat: Arc<dyn ChatModel>, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }

    /// Title for a conversation whose first message is `text`. Never fails.
    pub async fn generate(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return DEFAULT_TITLE.to_string();
        }

        match self.request_title(text).await {
            Ok(raw) => match clean_title(&raw) {
                Some(title) => {
                    debug!(title = %title, "Generated conversation title");
                    title
                }
                None => {
                    warn!(raw = %raw, "Title model returned nothing usable; using fallback");
                    fallback_title(text)
                }
            },
            Err(e) if e.is_auth_error() => {
                error!(error = %e, "Title model rejected the API key; using fallback");
                fallback_title(text)
            }
            Err(e) => {
                warn!(error = %e, "Title generation failed; using fallback");
                fallback_title(text)
            }
        }
    }

    async fn request_title(&self, text: &str) -> llm::Result<String> {
        let request = ChatRequest::new(self.model.clone(), vec![ContextMessage::user(title_prompt(text))])
            .with_max_tokens(TITLE_MAX_TOKENS)
            .with_temperature(TITLE_TEMPERATURE);

        let mut attempt = 0;
        loop {
            match self.chat.complete(request.clone()).await {
                Err(e) if e.is_retryable() && attempt < TITLE_RETRIES => {
                    attempt += 1;
                    debug!(error = %e, attempt, "Retrying title request");
                }
                result => return result,
            }
        }
    }
}

impl std::fmt::Debug for TitleGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TitleGenerator").field("model", &self.model).finish()
    }
}

fn title_prompt(text: &str) -> String {
    let truncated = if text.chars().count() > TITLE_INPUT_CHARS {
        format!("{}...", text.chars().take(TITLE_INPUT_CHARS).collect::<String>())
    } else {
        text.to_string()
    };

    format!(
        "Generate a concise 2-5 word title for this conversation. Be specific and descriptive.\n\n\
         Examples:\n\
         - \"Fix Python Error\"\n\
         - \"Plan Japan Trip\"\n\
         - \"Recipe for Pasta\"\n\
         - \"Resume Writing Help\"\n\n\
         User message: {}\n\nTitle:",
        truncated
    )
}

fn title_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^title:\s*").expect("valid title prefix regex"))
}

fn punctuation() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\w\s]").expect("valid punctuation regex"))
}

/// Tidy a model's title: surrounding quotes and a `Title:` prefix removed,
/// at most five words. `None` if less than two characters remain.
pub fn clean_title(raw: &str) -> Option<String> {
    const QUOTES: [char; 3] = ['"', '\'', '`'];

    let unprefixed = title_prefix().replace(raw.trim(), "");
    let mut title = unprefixed.trim();
    title = title.strip_prefix(QUOTES).unwrap_or(title);
    title = title.strip_suffix(QUOTES).unwrap_or(title);

    let title = title
        .split_whitespace()
        .take(TITLE_MAX_WORDS)
        .collect::<Vec<_>>()
        .join(" ");

    (title.chars().count() >= 2).then_some(title)
}

/// Heuristic title: first three words longer than two characters
pub fn fallback_title(text: &str) -> String {
    let stripped = punctuation().replace_all(text, " ");
    let words: Vec<&str> = stripped
        .split_whitespace()
        .filter(|word| word.chars().count() > 2)
        .take(FALLBACK_WORDS)
        .collect();

    if words.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        words.join(" ")
    }
}
