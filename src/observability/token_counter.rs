use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::protocol::UsageUpdate;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Token counters as reported by the pipeline over the course of a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub tokens_per_second: Option<f64>,
}

impl TokenUsage {
    /// Fold a usage report in. Reports are cumulative, so a present field
    /// replaces the previous value.
    pub fn absorb(&mut self, update: &UsageUpdate) {
        if update.prompt_tokens.is_some() {
            self.prompt_tokens = update.prompt_tokens;
        }
        if update.completion_tokens.is_some() {
            self.completion_tokens = update.completion_tokens;
        }
        if update.total_tokens.is_some() {
            self.total_tokens = update.total_tokens;
        }
        if update.tokens_per_second.is_some() {
            self.tokens_per_second = update.tokens_per_second;
        }
    }
}

/// Merge upstream-reported usage with a local completion estimate.
///
/// - Upstream non-zero values always win
/// - Only a missing or zero completion count is estimated
/// - Total is computed from the resolved parts when missing
/// - Prompt tokens are never estimated
#[must_use]
pub fn merge_usage(upstream: &TokenUsage, estimated_completion: u64) -> TokenUsage {
    let completion_tokens = match upstream.completion_tokens {
        Some(v) if v > 0 => Some(v),
        _ => Some(estimated_completion),
    };

    let total_tokens = match upstream.total_tokens {
        Some(v) if v > 0 => Some(v),
        _ => Some(upstream.prompt_tokens.unwrap_or(0) + completion_tokens.unwrap_or(0)),
    };

    TokenUsage {
        prompt_tokens: upstream.prompt_tokens,
        completion_tokens,
        total_tokens,
        tokens_per_second: upstream.tokens_per_second,
    }
}

/// Log token usage for a completed turn at INFO level.
pub fn log_turn_usage(model: &str, usage: &TokenUsage, duration: Duration) {
    info!(
        model = model,
        prompt_tokens = usage.prompt_tokens.unwrap_or(0),
        completion_tokens = usage.completion_tokens.unwrap_or(0),
        total_tokens = usage.total_tokens.unwrap_or(0),
        duration_seconds = duration.as_secs_f64(),
        "turn completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_upstream_nonzero_wins() {
        let upstream = TokenUsage {
            prompt_tokens: Some(10),
            completion_tokens: Some(7),
            ..TokenUsage::default()
        };
        let merged = merge_usage(&upstream, 99);
        assert_eq!(merged.completion_tokens, Some(7));
        assert_eq!(merged.total_tokens, Some(17));
    }

    #[test]
    fn test_zero_completion_is_estimated() {
        let upstream = TokenUsage {
            completion_tokens: Some(0),
            total_tokens: Some(0),
            ..TokenUsage::default()
        };
        let merged = merge_usage(&upstream, 5);
        assert_eq!(merged.completion_tokens, Some(5));
        assert_eq!(merged.total_tokens, Some(5));
        assert_eq!(merged.prompt_tokens, None);
    }

    #[test]
    fn test_absorb_keeps_unreported_fields() {
        let mut usage = TokenUsage::default();
        usage.absorb(&UsageUpdate {
            prompt_tokens: Some(3),
            ..UsageUpdate::default()
        });
        usage.absorb(&UsageUpdate {
            completion_tokens: Some(4),
            ..UsageUpdate::default()
        });
        assert_eq!(usage.prompt_tokens, Some(3));
        assert_eq!(usage.completion_tokens, Some(4));
    }
}
