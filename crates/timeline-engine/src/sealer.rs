//! Chunked chapter summarization and sealing.

use timeline_core::host::RetryDecision;
use timeline_core::{Chapter, NoticeLevel};
use timeline_llm::{Generator, GeneratorError, Prompt};

use crate::chunk::ChunkPlanner;
use crate::error::TimelineError;
use crate::prompt::{generate_options, render, split_title, with_title};
use crate::rate_limit::RateLimiter;
use crate::timeline::{HistoryLine, Result, Timeline};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SealRequest {
    /// Last message of the new chapter.
    pub end_msg_id: usize,
    pub title: Option<String>,
    /// Overrides the configured summarization profile.
    pub profile: Option<String>,
}

impl SealRequest {
    pub fn at(end_msg_id: usize) -> Self {
        Self {
            end_msg_id,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct ChapterSealer {
    timeline: Timeline,
    generator: Generator,
    limiter: RateLimiter,
}

impl ChapterSealer {
    pub fn new(timeline: Timeline, generator: Generator, limiter: RateLimiter) -> Self {
        Self {
            timeline,
            generator,
            limiter,
        }
    }

    /// Summarizes messages from the end of the last chapter through
    /// `request.end_msg_id` and appends the chapter. Nothing is written when
    /// summarization fails or is cancelled.
    pub async fn seal(&self, request: SealRequest) -> Result<Chapter> {
        let result = self.try_seal(&request).await;
        if let Err(err) = &result {
            self.timeline.host().notify(
                NoticeLevel::Warning,
                format!("Chapter end at message {}: {}", request.end_msg_id, err),
            );
        }
        result
    }

    async fn try_seal(&self, request: &SealRequest) -> Result<Chapter> {
        let start = self.timeline.next_start()?;
        let first = self.timeline.next_first_message()?;
        let len = self.timeline.store().message_count();
        let end = request.end_msg_id;

        if end >= len {
            return Err(TimelineError::OutOfBounds { index: end, len });
        }
        if end < first {
            return Err(TimelineError::OutOfOrder {
                end_msg_id: end,
                last_end: start,
            });
        }

        let profile = self.resolve_profile(request.profile.as_deref())?;
        let lines = self.timeline.history_lines(first, end, false);
        if lines.is_empty() {
            return Err(TimelineError::EmptyRange { start: first, end });
        }

        let summary = self.summarize(&profile, &lines).await?;
        let summary = with_title(request.title.as_deref(), &summary);
        self.timeline.add_chapter(summary, start, end).await
    }

    /// Regenerates a chapter's summary over the same range. A title heading
    /// is kept.
    pub async fn resummarize(&self, number: usize, profile: Option<&str>) -> Result<Chapter> {
        let chapter = self.timeline.chapter(number)?;
        let profile = self.resolve_profile(profile)?;
        let range = chapter.message_range(number - 1);
        let include_hidden = self.timeline.settings().read().hide_chapters;
        let lines = self
            .timeline
            .history_lines(*range.start(), *range.end(), include_hidden);
        if lines.is_empty() {
            return Err(TimelineError::EmptyRange {
                start: *range.start(),
                end: *range.end(),
            });
        }

        let summary = self.summarize(&profile, &lines).await?;
        let (title, _) = split_title(&chapter.summary);
        self.timeline
            .replace_summary(number, with_title(title, &summary))
    }

    fn resolve_profile(&self, requested: Option<&str>) -> Result<String> {
        let configured = self.timeline.settings().read().profile.clone();
        let requested = requested.map(str::to_string).or(configured);
        self.generator
            .resolve_profile(requested.as_deref())
            .map(|profile| profile.id)
            .map_err(TimelineError::from_generator)
    }

    /// One request for a slice that fits the budget; otherwise each chunk in
    /// order, then a combining pass.
    pub async fn summarize(&self, profile: &str, lines: &[HistoryLine]) -> Result<String> {
        let host = self.timeline.host();
        let planner = {
            let settings = self.timeline.settings().read();
            ChunkPlanner::for_context(host.tokens.clone(), host.profiles.max_context(), &settings)
        };
        let rendered: Vec<String> = lines.iter().map(ToString::to_string).collect();
        let chunks = planner.plan(&rendered).await;
        let prompts = self.timeline.settings().read().prompts.clone();

        if chunks.len() == 1 {
            let user = render(host, &prompts.chapter_summary, &[("content", &chunks[0])]);
            return self.request(profile, "Chapter summary", user).await;
        }

        log::info!(
            "[{}] summarizing {} chunks (budget {} tokens)",
            self.timeline.store().chat_id(),
            chunks.len(),
            planner.budget()
        );
        let mut partials = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let user = render(host, &prompts.chunk_summary, &[("content", chunk)]);
            let operation = format!("Chunk summary {}/{}", index + 1, chunks.len());
            partials.push(self.request(profile, &operation, user).await?);
        }

        let joined = partials.join("\n\n");
        let user = render(host, &prompts.chunk_combine, &[("summaries", &joined)]);
        self.request(profile, "Combine chunk summaries", user).await
    }

    /// Retries the same step until it yields text or the user cancels.
    async fn request(&self, profile: &str, operation: &str, user: String) -> Result<String> {
        let host = self.timeline.host();
        let (system, options) = {
            let settings = self.timeline.settings().read();
            (
                render(host, &settings.prompts.summary_system, &[]),
                generate_options(&settings),
            )
        };

        loop {
            self.limiter.acquire().await;
            let outcome = self
                .generator
                .generate(profile, Prompt::new(Some(system.clone()), user.clone()), options.clone())
                .await;

            let failure = match outcome {
                Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
                Ok(_) => None,
                Err(GeneratorError::Unavailable(reason)) => {
                    return Err(TimelineError::ProfileUnresolved(reason))
                }
                Err(err) => Some(err),
            };

            let reason = failure
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "the model returned an empty summary".to_string());
            log::warn!("[summarize] {} failed: {}", operation, reason);

            match host.interaction.confirm_retry(operation, &reason).await {
                RetryDecision::Retry => continue,
                RetryDecision::Cancel => {
                    return Err(match failure {
                        Some(err) => TimelineError::Generator(err),
                        None => TimelineError::EmptySummary,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use timeline_core::host::memory::InMemoryHost;
    use timeline_core::host::ConnectionProfile;
    use timeline_core::{HeuristicTokenCounter, HostError, Settings};

    use super::*;
    use crate::timeline::tests::conversation;

    fn summarizer_profile() -> ConnectionProfile {
        ConnectionProfile {
            id: "sum".to_string(),
            name: "Summarizer".to_string(),
            api: Some("openai".to_string()),
            model: Some("gpt-4o-mini".to_string()),
            preset: None,
            reasoning_template: None,
        }
    }

    /// One token per character; `max_context` sets the chunk budget.
    fn sealer(len: usize, max_context: usize) -> (Arc<InMemoryHost>, ChapterSealer) {
        let host = Arc::new(
            InMemoryHost::new(conversation(len))
                .with_profiles(vec![summarizer_profile()])
                .with_max_context(max_context)
                .with_token_counter(Arc::new(HeuristicTokenCounter::new(1.0, 1.0))),
        );
        let settings = Settings {
            profile: Some("Summarizer".to_string()),
            context_headroom: 0,
            ..Default::default()
        }
        .into_shared();
        let timeline = Timeline::new(host.host(), settings.clone());
        let sealer = ChapterSealer::new(
            timeline,
            Generator::new(host.host().profiles),
            RateLimiter::new(settings),
        );
        (host, sealer)
    }

    #[tokio::test]
    async fn single_chunk_seals_with_one_request() {
        let (host, sealer) = sealer(4, 10_000);
        host.push_response("They met at the inn.");

        let chapter = sealer.seal(SealRequest::at(3)).await.unwrap();

        assert_eq!(chapter, Chapter::new("They met at the inn.", 0, 3));
        assert_eq!(host.request_count(), 1);
        assert!(host.messages()[3].is_chapter_end());
        assert_eq!(sealer.timeline.len(), 1);
    }

    #[tokio::test]
    async fn two_chunks_need_three_requests() {
        // four ~12 token lines against a 30 token budget pack two per chunk
        let (host, sealer) = sealer(4, 30);
        host.push_response("part one");
        host.push_response("part two");
        host.push_response("whole chapter");

        let chapter = sealer.seal(SealRequest::at(3)).await.unwrap();

        assert_eq!(chapter.summary, "whole chapter");
        assert_eq!(host.request_count(), 3);
        let combine = &host.requests()[2].messages[1].content;
        assert!(combine.contains("part one\n\npart two"));
    }

    #[tokio::test]
    async fn empty_chunk_summary_cancelled_leaves_timeline_unchanged() {
        let (host, sealer) = sealer(4, 30);
        host.push_response("   ");

        let err = sealer.seal(SealRequest::at(3)).await.unwrap_err();

        assert!(matches!(err, TimelineError::EmptySummary));
        assert_eq!(host.retry_prompts().len(), 1);
        assert!(host.retry_prompts()[0].starts_with("Chunk summary 1/2"));
        assert_eq!(host.request_count(), 1);
        assert!(sealer.timeline.is_empty());
        assert!(!host.messages()[3].is_chapter_end());
        assert_eq!(host.notices().last().unwrap().0, NoticeLevel::Warning);
    }

    #[tokio::test]
    async fn retry_repeats_the_same_chunk() {
        let (host, sealer) = sealer(4, 10_000);
        host.push_response_error(HostError::Request {
            profile: "sum".to_string(),
            message: "timeout".to_string(),
        });
        host.push_response("second try");
        host.push_retry_decision(RetryDecision::Retry);

        let chapter = sealer.seal(SealRequest::at(3)).await.unwrap();

        assert_eq!(chapter.summary, "second try");
        assert_eq!(host.request_count(), 2);
        assert_eq!(host.requests()[0].messages, host.requests()[1].messages);
    }

    #[tokio::test]
    async fn title_is_prefixed_and_kept_on_resummarize() {
        let (host, sealer) = sealer(6, 10_000);
        host.push_response("first");
        host.push_response("rewritten");

        sealer
            .seal(SealRequest {
                end_msg_id: 3,
                title: Some("Arrival".to_string()),
                profile: None,
            })
            .await
            .unwrap();
        let chapter = sealer.resummarize(1, None).await.unwrap();

        assert_eq!(chapter.summary, "## Arrival\n\nrewritten");
        assert_eq!(chapter.end_msg_id, 3);
    }

    #[tokio::test]
    async fn unresolved_profile_aborts_before_any_request() {
        let (host, sealer) = sealer(4, 10_000);
        let err = sealer
            .seal(SealRequest {
                end_msg_id: 3,
                title: None,
                profile: Some("ghost".to_string()),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TimelineError::ProfileUnresolved(_)));
        assert_eq!(host.request_count(), 0);
    }

    #[tokio::test]
    async fn sealing_before_last_chapter_is_rejected() {
        let (host, sealer) = sealer(8, 10_000);
        host.push_response("first");
        sealer.seal(SealRequest::at(4)).await.unwrap();

        assert!(matches!(
            sealer.seal(SealRequest::at(4)).await,
            Err(TimelineError::OutOfOrder { .. })
        ));
        assert!(matches!(
            sealer.seal(SealRequest::at(8)).await,
            Err(TimelineError::OutOfBounds { .. })
        ));
    }
}
