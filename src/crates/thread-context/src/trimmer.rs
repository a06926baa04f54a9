//! Context window trimming
//!
//! Keeps the longest run of most recent messages whose estimated cost fits the
//! model's window minus the response reserve. Older messages are dropped
//! silently; the output is always a contiguous suffix of the input.

use crate::error::Result;
use crate::message::ContextMessage;
use crate::models::{ModelRegistry, DEFAULT_RESPONSE_RESERVE};
use crate::token_counter::{count_message, TokenCounter, TokenizerRegistry};
use tracing::{debug, warn};

/// Outcome of a trim, with the accounting used to produce it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimResult {
    /// Kept messages in chronological order
    pub messages: Vec<ContextMessage>,
    /// Estimated tokens of the kept messages
    pub total_tokens: usize,
    /// Token budget for history
    pub budget: usize,
    /// Number of leading messages dropped
    pub dropped: usize,
}

impl TrimResult {
    /// True when the newest message alone exceeded the budget and was kept anyway
    pub fn over_budget(&self) -> bool {
        self.total_tokens > self.budget
    }
}

/// Trims message lists against per-model token budgets
#[derive(Debug, Clone)]
pub struct ContextTrimmer {
    models: ModelRegistry,
    tokenizers: TokenizerRegistry,
}

impl ContextTrimmer {
    pub fn new(models: ModelRegistry, tokenizers: TokenizerRegistry) -> Self {
        Self { models, tokenizers }
    }

    /// Built-in model table with `cl100k_base` counting
    pub fn openai() -> Result<Self> {
        Ok(Self::new(ModelRegistry::builtin(), TokenizerRegistry::openai()?))
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn tokenizers(&self) -> &TokenizerRegistry {
        &self.tokenizers
    }

    /// Estimated cost of one message for `model_id`
    pub fn estimate(&self, model_id: &str, message: &ContextMessage) -> Result<usize> {
        let counter = self.tokenizers.for_model(model_id);
        count_message(counter.as_ref(), message)
    }

    /// Trim `messages` with the default response reserve
    pub fn trim(&self, model_id: &str, messages: &[ContextMessage]) -> Result<Vec<ContextMessage>> {
        self.trim_with_reserve(model_id, messages, DEFAULT_RESPONSE_RESERVE)
    }

    pub fn trim_with_reserve(
        &self,
        model_id: &str,
        messages: &[ContextMessage],
        response_reserve: usize,
    ) -> Result<Vec<ContextMessage>> {
        Ok(self.trim_detailed(model_id, messages, response_reserve)?.messages)
    }

    /// Trim and report the accounting.
    ///
    /// Walks newest to oldest and stops at the first message that would
    /// overflow. If the newest message alone is over budget it is returned on
    /// its own.
    pub fn trim_detailed(
        &self,
        model_id: &str,
        messages: &[ContextMessage],
        response_reserve: usize,
    ) -> Result<TrimResult> {
        let spec = self.models.get(model_id)?;
        let budget = spec.history_budget(response_reserve);
        let counter = self.tokenizers.for_model(model_id);

        let (kept, total_tokens) = select_suffix(counter.as_ref(), messages, budget)?;
        let start = messages.len() - kept;

        if total_tokens > budget {
            warn!(
                model = %model_id,
                tokens = total_tokens,
                budget,
                "Newest message exceeds the context budget; sending it alone"
            );
        }

        debug!(
            model = %model_id,
            kept,
            dropped = start,
            tokens = total_tokens,
            budget,
            "Trimmed context"
        );

        Ok(TrimResult {
            messages: messages[start..].to_vec(),
            total_tokens,
            budget,
            dropped: start,
        })
    }
}

/// Length and cost of the longest suffix that fits `budget`
fn select_suffix(
    counter: &dyn TokenCounter,
    messages: &[ContextMessage],
    budget: usize,
) -> Result<(usize, usize)> {
    let mut kept = 0;
    let mut total = 0;

    for message in messages.iter().rev() {
        let tokens = count_message(counter, message)?;
        if total + tokens > budget {
            if kept == 0 {
                return Ok((1, tokens));
            }
            break;
        }
        total += tokens;
        kept += 1;
    }

    Ok((kept, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContextError;
    use crate::models::ModelSpec;
    use crate::token_counter::CharEstimateCounter;
    use proptest::prelude::*;
    use std::sync::Arc;

    /// One token per char, so costs are easy to compute by hand
    fn char_trimmer(window: usize) -> ContextTrimmer {
        let registry = ModelRegistry::empty().with_model(ModelSpec::new("test-model", window));
        let tokenizers = TokenizerRegistry::new(Arc::new(CharEstimateCounter::new(1.0)));
        ContextTrimmer::new(registry, tokenizers)
    }

    fn numbered(n: usize, len: usize) -> Vec<ContextMessage> {
        (0..n)
            .map(|i| {
                let text = format!("{:0width$}", i, width = len);
                if i % 2 == 0 {
                    ContextMessage::user(text)
                } else {
                    ContextMessage::assistant(text)
                }
            })
            .collect()
    }

    #[test]
    fn test_unknown_model() {
        let trimmer = char_trimmer(100);
        let result = trimmer.trim("gpt-5", &numbered(2, 3));
        assert!(matches!(result, Err(ContextError::UnknownModel(_))));
    }

    #[test]
    fn test_everything_fits() {
        let trimmer = char_trimmer(100);
        let messages = numbered(5, 6); // 10 tokens each
        let result = trimmer.trim_detailed("test-model", &messages, 50).unwrap();
        assert_eq!(result.messages, messages);
        assert_eq!(result.total_tokens, 50);
        assert_eq!(result.dropped, 0);
    }

    #[test]
    fn test_stops_at_first_overflow() {
        let trimmer = char_trimmer(100);
        let messages = numbered(6, 6); // 10 tokens each
        let result = trimmer.trim_detailed("test-model", &messages, 65).unwrap();
        assert_eq!(result.messages, messages[3..].to_vec());
        assert_eq!(result.dropped, 3);
        assert_eq!(result.budget, 35);
    }

    #[test]
    fn test_smaller_older_message_not_skipped_to() {
        let trimmer = char_trimmer(30);
        let messages = vec![
            ContextMessage::user("a"),
            ContextMessage::assistant("x".repeat(22)),
            ContextMessage::user("b"),
        ];
        let kept = trimmer.trim_with_reserve("test-model", &messages, 0).unwrap();
        // costs 5, 26, 5: "a" would fit on its own but sits behind the overflow
        assert_eq!(kept, messages[2..].to_vec());
    }

    #[test]
    fn test_newest_alone_over_budget() {
        let trimmer = char_trimmer(50);
        let messages = vec![
            ContextMessage::user("short"),
            ContextMessage::user("y".repeat(200)),
        ];
        let result = trimmer.trim_detailed("test-model", &messages, 10).unwrap();
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0], messages[1]);
        assert!(result.over_budget());

        let again = trimmer.trim_with_reserve("test-model", &result.messages, 10).unwrap();
        assert_eq!(again, result.messages);
    }

    #[test]
    fn test_empty_input() {
        let trimmer = char_trimmer(50);
        assert!(trimmer.trim("test-model", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_gpt35_keeps_fifty_short_messages() {
        let trimmer = ContextTrimmer::openai().unwrap();
        let messages: Vec<_> = (0..50)
            .map(|i| ContextMessage::user(format!("Short message number {}", i)))
            .collect();
        let kept = trimmer.trim("gpt-3.5-turbo", &messages).unwrap();
        assert_eq!(kept.len(), 50);
    }

    #[test]
    fn test_gpt35_huge_single_message() {
        let trimmer = ContextTrimmer::openai().unwrap();
        // "hello " is one cl100k token per repetition
        let huge = ContextMessage::user("hello ".repeat(20_000));
        let messages = vec![ContextMessage::user("earlier"), huge.clone()];

        let result = trimmer
            .trim_detailed("gpt-3.5-turbo", &messages, DEFAULT_RESPONSE_RESERVE)
            .unwrap();
        assert_eq!(result.messages, vec![huge]);
        assert!(result.over_budget());
        assert_eq!(result.budget, 16385 - 1500);
    }

    fn arb_messages() -> impl Strategy<Value = Vec<ContextMessage>> {
        prop::collection::vec("[a-z ]{0,40}", 0..30)
            .prop_map(|texts| texts.into_iter().map(ContextMessage::user).collect())
    }

    proptest! {
        #[test]
        fn prop_output_is_suffix(messages in arb_messages(), reserve in 0usize..200) {
            let trimmer = char_trimmer(200);
            let kept = trimmer.trim_with_reserve("test-model", &messages, reserve).unwrap();
            prop_assert!(kept.len() <= messages.len());
            prop_assert_eq!(&messages[messages.len() - kept.len()..], &kept[..]);
        }

        #[test]
        fn prop_fits_budget_unless_single(messages in arb_messages(), reserve in 0usize..200) {
            let trimmer = char_trimmer(200);
            let result = trimmer.trim_detailed("test-model", &messages, reserve).unwrap();
            if result.messages.len() > 1 {
                prop_assert!(result.total_tokens <= result.budget);
            }
            if !messages.is_empty() {
                prop_assert!(!result.messages.is_empty());
            }
        }

        #[test]
        fn prop_idempotent(messages in arb_messages(), reserve in 0usize..200) {
            let trimmer = char_trimmer(200);
            let once = trimmer.trim_with_reserve("test-model", &messages, reserve).unwrap();
            let twice = trimmer.trim_with_reserve("test-model", &once, reserve).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
