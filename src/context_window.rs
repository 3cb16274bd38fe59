//! Context Window Manager: tracks per-model context limits and
//! decides an overflow strategy before handing a prompt to the LLM
//! backend (§4.3).

use crate::context::Message;

/// Words-to-tokens approximation. Precision is not required for
/// correctness, only for not over-shooting the window (§4.3) — this
/// is deliberately a rough multiplier, not a tokenizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    pub tokens_per_char: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            tokens_per_char: 0.75,
        }
    }
}

impl TokenEstimator {
    pub fn estimate(&self, text: &str) -> u32 {
        (text.chars().count() as f64 * self.tokens_per_char).ceil() as u32
    }

    fn estimate_messages(&self, messages: &[Message]) -> u32 {
        messages.iter().map(|m| self.estimate(&m.content)).sum()
    }
}

/// The chosen strategy for fitting messages plus a response budget
/// into a model's context window.
#[derive(Debug, Clone, PartialEq)]
pub enum OverflowStrategy {
    AsIs,
    TruncateOldest,
    SummariseTail,
    /// All in-window strategies were exhausted; suggests a smaller
    /// budget for the Response Planner to decide on.
    DegradeModel { suggested_budget: u32 },
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub strategy: OverflowStrategy,
    pub final_messages: Vec<Message>,
}

const SUMMARY_PLACEHOLDER: &str = "[earlier context summarised]";
/// Messages longer than this are candidates for summarisation in the
/// `summarise_tail` strategy.
const LONG_MESSAGE_CHARS: usize = 2_000;

/// Fits `messages` plus a token `budget` into `context_window` tokens,
/// escalating through (1) dropping oldest non-system messages, (2)
/// replacing long middle messages with a summary placeholder, (3)
/// surfacing `degrade_model` if the first two still don't fit.
pub fn fit(
    messages: &[Message],
    budget: u32,
    context_window: u32,
    estimator: &TokenEstimator,
) -> FitResult {
    if estimator.estimate_messages(messages) + budget <= context_window {
        return FitResult {
            strategy: OverflowStrategy::AsIs,
            final_messages: messages.to_vec(),
        };
    }

    let mut truncated = messages.to_vec();
    while estimator.estimate_messages(&truncated) + budget > context_window {
        let drop_index = truncated
            .iter()
            .position(|m| m.role != crate::context::Role::System);
        match drop_index {
            Some(idx) => {
                truncated.remove(idx);
            }
            None => break,
        }
    }
    if estimator.estimate_messages(&truncated) + budget <= context_window {
        return FitResult {
            strategy: OverflowStrategy::TruncateOldest,
            final_messages: truncated,
        };
    }

    let mut summarised = truncated.clone();
    for message in summarised.iter_mut() {
        if message.content.len() > LONG_MESSAGE_CHARS {
            message.content = SUMMARY_PLACEHOLDER.to_string();
        }
    }
    if estimator.estimate_messages(&summarised) + budget <= context_window {
        return FitResult {
            strategy: OverflowStrategy::SummariseTail,
            final_messages: summarised,
        };
    }

    let used = estimator.estimate_messages(&summarised);
    let suggested_budget = context_window.saturating_sub(used).max(crate::budget::MIN_BUDGET);
    FitResult {
        strategy: OverflowStrategy::DegradeModel { suggested_budget },
        final_messages: summarised,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Message;

    #[test]
    fn small_conversation_fits_as_is() {
        let messages = vec![Message::user("Hallo"), Message::assistant("Hi!")];
        let result = fit(&messages, 500, 200_000, &TokenEstimator::default());
        assert_eq!(result.strategy, OverflowStrategy::AsIs);
        assert_eq!(result.final_messages.len(), 2);
    }

    #[test]
    fn oversized_history_drops_oldest_first() {
        let estimator = TokenEstimator::default();
        let mut messages = vec![Message::system("system prompt")];
        for i in 0..50 {
            messages.push(Message::user(format!("message number {i} with some padding text")));
        }
        let result = fit(&messages, 100, 400, &estimator);
        assert_eq!(result.strategy, OverflowStrategy::TruncateOldest);
        assert!(result.final_messages.iter().any(|m| m.role == crate::context::Role::System));
        assert!(result.final_messages.len() < messages.len());
    }

    #[test]
    fn extremely_tight_window_degrades_model() {
        let estimator = TokenEstimator::default();
        let messages = vec![Message::user("x".repeat(10_000))];
        let result = fit(&messages, 5_000, 1_000, &estimator);
        match result.strategy {
            OverflowStrategy::DegradeModel { suggested_budget } => {
                assert!(suggested_budget >= crate::budget::MIN_BUDGET);
            }
            other => panic!("expected degrade_model, got {other:?}"),
        }
    }

    #[test]
    fn system_messages_are_never_dropped() {
        let estimator = TokenEstimator::default();
        let mut messages = vec![Message::system("keep me")];
        for i in 0..20 {
            messages.push(Message::user(format!("filler {i}").repeat(50)));
        }
        let result = fit(&messages, 10, 200, &estimator);
        assert!(result
            .final_messages
            .iter()
            .any(|m| m.role == crate::context::Role::System));
    }
}
