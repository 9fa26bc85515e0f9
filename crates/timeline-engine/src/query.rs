//! Questions answered from a chapter's exact messages.

use timeline_llm::{Generator, Prompt};

use crate::error::QueryError;
use crate::prompt::{generate_options, render};
use crate::rate_limit::RateLimiter;
use crate::timeline::Timeline;

#[derive(Clone)]
pub struct QueryEngine {
    timeline: Timeline,
    generator: Generator,
    limiter: RateLimiter,
}

impl QueryEngine {
    pub fn new(timeline: Timeline, generator: Generator, limiter: RateLimiter) -> Self {
        Self {
            timeline,
            generator,
            limiter,
        }
    }

    pub async fn try_query_chapter(&self, number: usize, query: &str) -> Result<String, QueryError> {
        let count = self.timeline.chapters()?.len();
        if number == 0 || number > count {
            return Err(QueryError::ChapterNotFound(number));
        }
        self.run(number, number, query).await
    }

    /// The per-call chapter cap is checked before the timeline is consulted.
    pub async fn try_query_chapters(
        &self,
        start: usize,
        end: usize,
        query: &str,
    ) -> Result<String, QueryError> {
        if start == 0 || end < start {
            return Err(QueryError::InvalidRange { start, end });
        }
        let limit = self.timeline.settings().read().chapter_limit;
        let requested = end - start + 1;
        if limit > 0 && requested > limit {
            return Err(QueryError::TooManyChapters { limit, requested });
        }

        let count = self.timeline.chapters()?.len();
        if start > count {
            return Err(QueryError::ChapterNotFound(start));
        }
        if end > count {
            return Err(QueryError::ChapterNotFound(end));
        }
        self.run(start, end, query).await
    }

    /// Like [`QueryEngine::try_query_chapter`], with failures rendered as text.
    pub async fn query_chapter(&self, number: usize, query: &str) -> String {
        self.try_query_chapter(number, query)
            .await
            .unwrap_or_else(|err| err.to_string())
    }

    pub async fn query_chapters(&self, start: usize, end: usize, query: &str) -> String {
        self.try_query_chapters(start, end, query)
            .await
            .unwrap_or_else(|err| err.to_string())
    }

    async fn run(&self, start: usize, end: usize, query: &str) -> Result<String, QueryError> {
        let (chapter, summary) = if start == end {
            (
                self.timeline.chapter_text(start)?,
                self.timeline.chapter_summary(start)?,
            )
        } else {
            let mut texts = Vec::with_capacity(end - start + 1);
            let mut summaries = Vec::with_capacity(end - start + 1);
            for number in start..=end {
                texts.push(format!("Chapter: {}\n{}", number, self.timeline.chapter_text(number)?));
                summaries.push(format!(
                    "Chapter: {}\n{}",
                    number,
                    self.timeline.chapter_summary(number)?
                ));
            }
            (texts.join("\n\n"), summaries.join("\n\n"))
        };

        let host = self.timeline.host();
        let timeline_json = self.timeline.timeline_json();
        let (profile, system, user, options) = {
            let settings = self.timeline.settings().read();
            let vars = [
                ("timeline", timeline_json.as_str()),
                ("chapter", chapter.as_str()),
                ("chapterSummary", summary.as_str()),
                ("query", query),
            ];
            (
                settings.query_profile().map(str::to_string),
                render(host, &settings.prompts.query_system, &vars),
                render(host, &settings.prompts.query, &vars),
                generate_options(&settings),
            )
        };

        let profile = self.generator.resolve_profile(profile.as_deref())?;
        self.limiter.acquire().await;
        log::debug!(
            "[{}] querying chapters {}-{} with {}",
            self.timeline.store().chat_id(),
            start,
            end,
            profile.name
        );
        Ok(self
            .generator
            .generate(&profile.id, Prompt::new(Some(system), user), options)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use timeline_core::host::memory::InMemoryHost;
    use timeline_core::host::ConnectionProfile;
    use timeline_core::Settings;

    use super::*;
    use crate::timeline::tests::conversation;

    fn engine(chapter_limit: usize) -> (Arc<InMemoryHost>, QueryEngine) {
        let host = Arc::new(InMemoryHost::new(conversation(12)).with_profiles(vec![
            ConnectionProfile {
                id: "q".to_string(),
                name: "Query".to_string(),
                api: None,
                model: Some("gpt-4o".to_string()),
                preset: None,
                reasoning_template: None,
            },
        ]));
        let settings = Settings {
            query_profile: Some("q".to_string()),
            chapter_limit,
            hide_chapters: false,
            ..Default::default()
        }
        .into_shared();
        let timeline = Timeline::new(host.host(), settings.clone());
        let engine = QueryEngine::new(
            timeline,
            Generator::new(host.host().profiles),
            RateLimiter::new(settings),
        );
        (host, engine)
    }

    async fn seal_three(engine: &QueryEngine) {
        engine.timeline.add_chapter("arrival", 0, 3).await.unwrap();
        engine.timeline.add_chapter("market", 3, 7).await.unwrap();
        engine.timeline.add_chapter("duel", 7, 11).await.unwrap();
    }

    #[tokio::test]
    async fn empty_timeline_query_is_not_found() {
        let (host, engine) = engine(0);

        assert_eq!(engine.query_chapter(1, "?").await, "Chapter 1 not found");
        assert_eq!(host.request_count(), 0);
    }

    #[tokio::test]
    async fn range_over_cap_is_rejected_without_generation() {
        let (host, engine) = engine(3);
        seal_three(&engine).await;

        let reply = engine.query_chapters(1, 5, "what happened?").await;

        assert!(reply.contains("Cannot query more than 3"), "{}", reply);
        assert_eq!(host.request_count(), 0);
    }

    #[tokio::test]
    async fn single_chapter_prompt_carries_its_messages() {
        let (host, engine) = engine(0);
        seal_three(&engine).await;
        host.push_response("They dueled at dawn.");

        let reply = engine.query_chapter(3, "Who won?").await;

        assert_eq!(reply, "They dueled at dawn.");
        let prompt = &host.requests()[0].messages[1].content;
        assert!(prompt.contains("Mara: line 8"));
        assert!(!prompt.contains("line 7\n"));
        assert!(prompt.contains("duel"));
        assert!(prompt.contains("Question: Who won?"));
    }

    #[tokio::test]
    async fn range_prompt_has_chapter_headers() {
        let (host, engine) = engine(3);
        seal_three(&engine).await;
        host.push_response("ok");

        engine.try_query_chapters(1, 2, "Q2").await.unwrap();

        let prompt = &host.requests()[0].messages[1].content;
        assert!(prompt.contains("Chapter: 1\nMara: line 0"));
        assert!(prompt.contains("Chapter: 2\nMara: line 4"));
        assert!(prompt.contains("Chapter: 2\nmarket"));
    }

    #[tokio::test]
    async fn generator_failure_becomes_error_text() {
        let (_, engine) = engine(0);
        seal_three(&engine).await;

        let reply = engine.query_chapter(2, "?").await;

        assert!(reply.starts_with("Query failed"), "{}", reply);
    }

    #[tokio::test]
    async fn missing_profile_is_reported() {
        let (_, engine) = engine(0);
        seal_three(&engine).await;
        engine.timeline.settings().write().query_profile = Some("nope".to_string());

        let err = engine.try_query_chapter(1, "?").await.unwrap_err();
        assert!(matches!(err, QueryError::ProfileUnresolved(_)));
    }
}
