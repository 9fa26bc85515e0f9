use std::sync::Arc;

use parking_lot::RwLock;
use timeline_core::{FillMode, TimelineFillResult};

/// Last fill run's answers, shared with the `timelineResponses` macro.
#[derive(Clone, Default)]
pub struct FillResults {
    inner: Arc<RwLock<Vec<TimelineFillResult>>>,
}

impl FillResults {
    /// Swaps in a whole run's results.
    pub fn replace(&self, results: Vec<TimelineFillResult>) {
        *self.inner.write() = results;
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    pub fn snapshot(&self) -> Vec<TimelineFillResult> {
        self.inner.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Text injected into prompts. Failed queries are left out.
    pub fn format_for_injection(&self) -> String {
        self.inner
            .read()
            .iter()
            .filter(|result| !result.is_error())
            .map(|result| match result.mode {
                FillMode::Agentic => format!("[{}]\n{}", result.query, result.response),
                FillMode::Static => {
                    let chapters = match (result.start_chapter, result.end_chapter) {
                        (Some(start), Some(end)) if start == end => format!(" (chapter {})", start),
                        (Some(start), Some(end)) => format!(" (chapters {}-{})", start, end),
                        _ => String::new(),
                    };
                    format!("[Timeline query{}: {}]\n{}", chapters, result.query, result.response)
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_static_and_agentic_results() {
        let results = FillResults::default();
        results.replace(vec![
            TimelineFillResult {
                mode: FillMode::Static,
                query: "Who is Vex?".to_string(),
                response: "A duelist.".to_string(),
                start_chapter: Some(2),
                end_chapter: Some(2),
                error: None,
            },
            TimelineFillResult {
                mode: FillMode::Static,
                query: "broken".to_string(),
                response: String::new(),
                start_chapter: Some(1),
                end_chapter: Some(3),
                error: Some("Query failed".to_string()),
            },
            TimelineFillResult::agentic("FI"),
        ]);

        assert_eq!(
            results.format_for_injection(),
            "[Timeline query (chapter 2): Who is Vex?]\nA duelist.\n\n[Agentic Timeline Fill Session]\nFI"
        );
        results.clear();
        assert!(results.is_empty());
        assert_eq!(results.format_for_injection(), "");
    }
}
