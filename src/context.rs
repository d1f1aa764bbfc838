//! Budgeted context assembly.
//!
//! Retrieved passages are concatenated in ranking order, measured with a
//! word-count token proxy, and forced under the configured budget via a
//! summarization fallback and, past that, a hard truncation with an
//! explicit marker. Budget overflow is absorbed here, never surfaced as
//! an error.

use crate::config::EngineConfig;
use crate::error::GenerationError;
use crate::generation::CompletionService;
use crate::types::{Message, RetrievedPassage};
use tokio::time::timeout;
use tracing::debug;

/// Marker appended when the context had to be hard-truncated.
pub const TRUNCATION_MARKER: &str = "...";

const PASSAGE_SEPARATOR: &str = " ";

/// Word-count token proxy.
pub fn word_estimate(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Token estimate for the existing history, text payloads only.
pub fn history_estimate(history: &[Message]) -> usize {
    let joined: Vec<&str> = history.iter().map(|m| m.content.as_text()).collect();
    word_estimate(&joined.join(" "))
}

fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > max_words {
        format!("{}{}", words[..max_words].join(" "), TRUNCATION_MARKER)
    } else {
        text.to_string()
    }
}

/// Assemble a context string guaranteed to fit the token budget.
///
/// Deterministic given identical passages and a deterministic
/// summarizer; the summarization call itself is an external dependency
/// and may not be deterministic across invocations, so tests mock it.
/// Empty retrieval yields an empty context and the turn proceeds on
/// history alone.
pub async fn assemble_context(
    passages: &[RetrievedPassage],
    history_tokens: usize,
    config: &EngineConfig,
    summarizer: &dyn CompletionService,
) -> Result<String, GenerationError> {
    if passages.is_empty() {
        return Ok(String::new());
    }

    let budget = config
        .max_context_tokens
        .saturating_sub(config.reserved_response_tokens)
        .saturating_sub(history_tokens);
    // History alone can fill the window; even the truncation marker
    // would overshoot a zero budget, so passages are dropped outright.
    if budget == 0 {
        debug!("no context budget left after history, omitting passages");
        return Ok(String::new());
    }

    let texts: Vec<&str> = passages.iter().map(|p| p.text.as_str()).collect();
    let mut combined = texts.join(PASSAGE_SEPARATOR);

    if word_estimate(&combined) > budget {
        debug!(
            estimate = word_estimate(&combined),
            budget, "context over budget, summarizing"
        );
        combined = timeout(config.summarize_timeout, summarizer.summarize(&combined))
            .await
            .map_err(|_| GenerationError::Timeout)??;

        if word_estimate(&combined) > budget {
            debug!(budget, "summary still over budget, truncating");
            combined = truncate_words(&combined, budget);
        }
    }

    Ok(combined)
}
