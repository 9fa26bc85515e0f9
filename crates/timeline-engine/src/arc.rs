//! Proposes chapter breaks over the unsealed tail of the transcript.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use timeline_core::Chapter;
use timeline_llm::{Generator, Prompt};

use crate::error::TimelineError;
use crate::json::{as_index, parse_json_array};
use crate::prompt::{generate_options, render, with_title};
use crate::rate_limit::RateLimiter;
use crate::timeline::{Result, Timeline};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArcProposal {
    pub title: String,
    pub summary: String,
    pub chapter_end: usize,
}

/// Keeps arcs that end inside `first..=last` in strictly increasing order.
pub fn parse_arcs(reply: &str, first: usize, last: usize) -> Result<Vec<ArcProposal>> {
    let items = parse_json_array(reply).map_err(TimelineError::InvalidPlan)?;
    let mut arcs: Vec<ArcProposal> = Vec::new();

    for item in items {
        let Some(object) = item.as_object() else {
            continue;
        };
        let Some(end) = object
            .get("chapterEnd")
            .or_else(|| object.get("chapter_end"))
            .and_then(as_index)
            .and_then(|end| usize::try_from(end).ok())
        else {
            continue;
        };
        if end < first || end > last {
            continue;
        }
        if arcs.last().is_some_and(|previous| end <= previous.chapter_end) {
            continue;
        }
        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(|value| value.trim().to_string())
                .unwrap_or_default()
        };
        arcs.push(ArcProposal {
            title: text("title"),
            summary: text("summary"),
            chapter_end: end,
        });
    }

    Ok(arcs)
}

#[derive(Clone)]
pub struct ArcAnalyzer {
    timeline: Timeline,
    generator: Generator,
    limiter: RateLimiter,
}

impl ArcAnalyzer {
    pub fn new(timeline: Timeline, generator: Generator, limiter: RateLimiter) -> Self {
        Self {
            timeline,
            generator,
            limiter,
        }
    }

    pub async fn analyze(&self, profile: Option<&str>) -> Result<Vec<ArcProposal>> {
        let first = self.timeline.next_first_message()?;
        let len = self.timeline.store().message_count();
        let Some(last) = len.checked_sub(1).filter(|&last| last >= first) else {
            return Err(TimelineError::EmptyRange {
                start: first,
                end: len.saturating_sub(1),
            });
        };

        let lines = self.timeline.history_lines(first, last, false);
        if lines.is_empty() {
            return Err(TimelineError::EmptyRange { start: first, end: last });
        }
        let content = lines
            .iter()
            .map(|line| format!("[{}] {}", line.index, line))
            .collect::<Vec<_>>()
            .join("\n");

        let host = self.timeline.host();
        let (configured, system, user, options) = {
            let settings = self.timeline.settings().read();
            let first_id = first.to_string();
            (
                settings.profile.clone(),
                render(host, &settings.prompts.summary_system, &[]),
                render(
                    host,
                    &settings.prompts.arc_analyzer,
                    &[("content", content.as_str()), ("firstMessageId", first_id.as_str())],
                ),
                generate_options(&settings),
            )
        };
        let requested = profile.map(str::to_string).or(configured);
        let profile = self
            .generator
            .resolve_profile(requested.as_deref())
            .map_err(TimelineError::from_generator)?;

        self.limiter.acquire().await;
        let reply = self
            .generator
            .generate(&profile.id, Prompt::new(Some(system), user), options)
            .await?;
        parse_arcs(&reply, first, last)
    }

    /// Seals each proposal in order using its own summary and title.
    pub async fn apply(&self, arcs: &[ArcProposal]) -> Result<Vec<Chapter>> {
        let mut sealed = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let start = self.timeline.next_start()?;
            let summary = with_title(Some(&arc.title), &arc.summary);
            sealed.push(self.timeline.add_chapter(summary, start, arc.chapter_end).await?);
        }
        Ok(sealed)
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

    #[test]
    fn drops_out_of_range_and_unordered_arcs() {
        let arcs = parse_arcs(
            r#"[{"title": "A", "summary": "a", "chapterEnd": 5},
                {"title": "B", "summary": "b", "chapterEnd": 4},
                {"title": "C", "summary": "c", "chapterEnd": "9"},
                {"title": "D", "summary": "d", "chapterEnd": 40}]"#,
            2,
            10,
        )
        .unwrap();

        let ends: Vec<usize> = arcs.iter().map(|arc| arc.chapter_end).collect();
        assert_eq!(ends, vec![5, 9]);
    }

    #[tokio::test]
    async fn analyze_then_apply_seals_arcs() {
        let host = Arc::new(InMemoryHost::new(conversation(10)).with_profiles(vec![
            ConnectionProfile {
                id: "s".to_string(),
                name: "S".to_string(),
                api: None,
                model: None,
                preset: None,
                reasoning_template: None,
            },
        ]));
        let settings = Settings {
            profile: Some("s".to_string()),
            hide_chapters: false,
            ..Default::default()
        }
        .into_shared();
        let timeline = Timeline::new(host.host(), settings.clone());
        let analyzer = ArcAnalyzer::new(
            timeline.clone(),
            Generator::new(host.host().profiles),
            RateLimiter::new(settings),
        );
        host.push_response(
            r#"```json
[{"title": "Arrival", "summary": "They arrive.", "chapterEnd": 4},
 {"title": "Market", "summary": "They shop.", "chapterEnd": 8}]
```"#,
        );

        let arcs = analyzer.analyze(None).await.unwrap();
        let chapters = analyzer.apply(&arcs).await.unwrap();

        assert!(host.requests()[0].messages[1].content.contains("[0] Mara: line 0"));
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1], Chapter::new("## Market\n\nThey shop.", 4, 8));
        assert!(timeline.validate().unwrap().is_empty());
    }
}
