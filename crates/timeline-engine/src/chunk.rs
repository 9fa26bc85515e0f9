use std::sync::Arc;

use timeline_core::{Settings, TokenCounter};

/// Greedy packer splitting transcript lines into token-bounded chunks.
#[derive(Clone)]
pub struct ChunkPlanner {
    tokens: Arc<dyn TokenCounter>,
    budget: usize,
}

impl ChunkPlanner {
    pub fn new(tokens: Arc<dyn TokenCounter>, budget: usize) -> Self {
        Self {
            tokens,
            budget: budget.max(1),
        }
    }

    /// Budget is the host context window minus the instruction headroom.
    pub fn for_context(tokens: Arc<dyn TokenCounter>, max_context: usize, settings: &Settings) -> Self {
        Self::new(tokens, max_context.saturating_sub(settings.context_headroom))
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Packs `lines` in order, counting the newline joiners against the
    /// budget. A line larger than the budget becomes its own chunk.
    pub async fn plan(&self, lines: &[String]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;
        let separator_tokens = self.tokens.count_text("\n").await;

        for line in lines {
            let line_tokens = self.tokens.count_text(line).await;
            if !current.is_empty() && current_tokens + separator_tokens + line_tokens > self.budget {
                chunks.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            if !current.is_empty() {
                current.push('\n');
                current_tokens += separator_tokens;
            }
            current.push_str(line);
            current_tokens += line_tokens;
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use timeline_core::HeuristicTokenCounter;

    use super::*;

    fn planner(budget: usize) -> ChunkPlanner {
        // one token per character
        ChunkPlanner::new(Arc::new(HeuristicTokenCounter::new(1.0, 1.0)), budget)
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[tokio::test]
    async fn small_slice_is_one_chunk() {
        let chunks = planner(100).plan(&lines(&["a: hi", "b: hey"])).await;
        assert_eq!(chunks, vec!["a: hi\nb: hey".to_string()]);
    }

    #[tokio::test]
    async fn splits_when_next_line_would_exceed_budget() {
        let chunks = planner(11).plan(&lines(&["aaaaa", "bbbbb", "ccccc"])).await;
        assert_eq!(chunks, vec!["aaaaa\nbbbbb".to_string(), "ccccc".to_string()]);
    }

    #[tokio::test]
    async fn joiners_count_against_the_budget() {
        let chunks = planner(10).plan(&lines(&["aaaaa", "bbbbb", "cccc"])).await;
        assert_eq!(chunks, vec!["aaaaa".to_string(), "bbbbb\ncccc".to_string()]);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
    }

    #[tokio::test]
    async fn oversized_line_stands_alone() {
        let chunks = planner(3).plan(&lines(&["toolong", "ok"])).await;
        assert_eq!(chunks, vec!["toolong".to_string(), "ok".to_string()]);
    }

    #[tokio::test]
    async fn empty_slice_has_no_chunks() {
        assert!(planner(10).plan(&[]).await.is_empty());
    }

    #[test]
    fn budget_subtracts_headroom() {
        let settings = Settings {
            context_headroom: 1000,
            ..Default::default()
        };
        let planner = ChunkPlanner::for_context(
            Arc::new(HeuristicTokenCounter::default()),
            8192,
            &settings,
        );
        assert_eq!(planner.budget(), 7192);
    }
}
