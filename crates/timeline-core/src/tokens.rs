//! Token counting for chunk budgeting.
//!
//! Hosts usually own a tokenizer matching the selected model; when they do
//! not, [`HeuristicTokenCounter`] estimates with chars/4 plus a 10% margin.

use std::sync::Arc;

use async_trait::async_trait;

/// Asynchronous token counter supplied by the host.
#[async_trait]
pub trait TokenCounter: Send + Sync {
    async fn count_text(&self, text: &str) -> usize;
}

/// Heuristic token counter using character-based estimation.
///
/// Deliberately overestimates so packed chunks stay under the model budget.
#[derive(Debug, Clone)]
pub struct HeuristicTokenCounter {
    chars_per_token: f64,
    safety_margin: f64,
}

impl HeuristicTokenCounter {
    pub fn new(chars_per_token: f64, safety_margin: f64) -> Self {
        Self {
            chars_per_token,
            safety_margin,
        }
    }

    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let char_count = text.chars().count() as f64;
        let adjusted = char_count / self.chars_per_token * self.safety_margin;

        adjusted.ceil() as usize
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new(4.0, 1.1)
    }
}

#[async_trait]
impl TokenCounter for HeuristicTokenCounter {
    async fn count_text(&self, text: &str) -> usize {
        self.estimate(text)
    }
}

pub type SharedTokenCounter = Arc<dyn TokenCounter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heuristic_counter_counts_text() {
        let counter = HeuristicTokenCounter::default();

        // 13 chars -> 13/4 * 1.1 = 3.575 -> 4
        assert_eq!(counter.count_text("Hello, world!").await, 4);
    }

    #[tokio::test]
    async fn heuristic_counter_counts_empty_text() {
        let counter = HeuristicTokenCounter::default();
        assert_eq!(counter.count_text("").await, 0);
    }

    #[test]
    fn heuristic_counter_counts_characters_not_bytes() {
        let counter = HeuristicTokenCounter::new(1.0, 1.0);
        assert_eq!(counter.estimate("héllo"), 5);
    }
}
