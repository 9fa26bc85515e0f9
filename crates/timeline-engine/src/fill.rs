//! Static timeline fill: plan queries with one request, then run them.

use serde_json::Value;
use timeline_core::{FillMode, TimelineFillResult};
use timeline_llm::{Generator, Prompt};

use crate::error::TimelineError;
use crate::json::{as_index, parse_json_array};
use crate::prompt::{generate_options, render};
use crate::query::QueryEngine;
use crate::rate_limit::RateLimiter;
use crate::results::FillResults;
use crate::timeline::{join_lines, Result, Timeline};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanTarget {
    Chapters(Vec<usize>),
    Range { start: usize, end: usize },
}

/// One planned lookup, indices already clamped to the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub query: String,
    pub target: PlanTarget,
}

impl QueryPlan {
    /// Each listed chapter is its own query; a range is one query.
    fn units(&self) -> Vec<(usize, usize)> {
        match &self.target {
            PlanTarget::Chapters(chapters) => chapters.iter().map(|&c| (c, c)).collect(),
            PlanTarget::Range { start, end } => vec![(*start, *end)],
        }
    }
}

fn clamp(index: i64, chapter_count: usize) -> usize {
    index.clamp(1, chapter_count.max(1) as i64) as usize
}

fn field<'a>(object: &'a serde_json::Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| object.get(*name))
}

/// Parses the planner's reply. Items without a query or target are dropped.
pub fn parse_plans(reply: &str, chapter_count: usize) -> Result<Vec<QueryPlan>> {
    let items = parse_json_array(reply).map_err(TimelineError::InvalidPlan)?;
    let mut plans = Vec::new();

    for item in items {
        let Some(object) = item.as_object() else {
            continue;
        };
        let Some(query) = object
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|query| !query.is_empty())
        else {
            continue;
        };

        let target = if let Some(Value::Array(chapters)) = object.get("chapters") {
            let mut list: Vec<usize> = chapters
                .iter()
                .filter_map(as_index)
                .map(|index| clamp(index, chapter_count))
                .collect();
            list.dedup();
            if list.is_empty() {
                continue;
            }
            PlanTarget::Chapters(list)
        } else {
            let start = field(object, &["startChapter", "start_chapter"]).and_then(as_index);
            let end = field(object, &["endChapter", "end_chapter"]).and_then(as_index);
            let (start, end) = match (start, end) {
                (Some(start), Some(end)) => (start, end),
                (Some(single), None) | (None, Some(single)) => (single, single),
                (None, None) => continue,
            };
            let (start, end) = (clamp(start, chapter_count), clamp(end, chapter_count));
            PlanTarget::Range {
                start: start.min(end),
                end: start.max(end),
            }
        };

        plans.push(QueryPlan {
            query: query.to_string(),
            target,
        });
    }

    Ok(plans)
}

#[derive(Clone)]
pub struct TimelineFill {
    timeline: Timeline,
    generator: Generator,
    limiter: RateLimiter,
    queries: QueryEngine,
    results: FillResults,
}

impl TimelineFill {
    pub fn new(
        timeline: Timeline,
        generator: Generator,
        limiter: RateLimiter,
        queries: QueryEngine,
        results: FillResults,
    ) -> Self {
        Self {
            timeline,
            generator,
            limiter,
            queries,
            results,
        }
    }

    /// Plans, runs at most `max_queries` queries, and replaces the stored
    /// results. Individual query failures are recorded, not raised.
    pub async fn run(&self) -> Result<Vec<TimelineFillResult>> {
        let chapter_count = self.timeline.chapters()?.len();
        if chapter_count == 0 {
            log::info!("[{}] timeline fill skipped: no chapters", self.timeline.store().chat_id());
            self.results.replace(Vec::new());
            return Ok(Vec::new());
        }

        let reply = self.plan_request().await?;
        let max_queries = self.timeline.settings().read().timeline_fill.max_queries;
        let mut plans = parse_plans(&reply, chapter_count)?;
        plans.truncate(max_queries);

        let units: Vec<(String, usize, usize)> = plans
            .iter()
            .flat_map(|plan| {
                plan.units()
                    .into_iter()
                    .map(move |(start, end)| (plan.query.clone(), start, end))
            })
            .take(max_queries)
            .collect();

        log::info!(
            "[{}] timeline fill running {} queries",
            self.timeline.store().chat_id(),
            units.len()
        );

        let mut results = Vec::with_capacity(units.len());
        for (query, start, end) in units {
            let outcome = if start == end {
                self.queries.try_query_chapter(start, &query).await
            } else {
                self.queries.try_query_chapters(start, end, &query).await
            };
            let (response, error) = match outcome {
                Ok(response) => (response, None),
                Err(err) => {
                    log::warn!("[fill] query `{}` failed: {}", query, err);
                    (String::new(), Some(err.to_string()))
                }
            };
            results.push(TimelineFillResult {
                mode: FillMode::Static,
                query,
                response,
                start_chapter: Some(start),
                end_chapter: Some(end),
                error,
            });
        }

        self.results.replace(results.clone());
        Ok(results)
    }

    async fn plan_request(&self) -> Result<String> {
        let host = self.timeline.host();
        let timeline_json = self.timeline.timeline_json();
        let recent = {
            let count = self.timeline.settings().read().timeline_fill.context_messages;
            let len = self.timeline.store().message_count();
            let lines = self
                .timeline
                .history_lines(len.saturating_sub(count), len.saturating_sub(1), false);
            join_lines(&lines)
        };

        let (profile, system, user, options) = {
            let settings = self.timeline.settings().read();
            let max_queries = settings.timeline_fill.max_queries.to_string();
            let vars = [
                ("timeline", timeline_json.as_str()),
                ("recent", recent.as_str()),
                ("maxQueries", max_queries.as_str()),
            ];
            (
                settings.fill_profile().map(str::to_string),
                render(host, &settings.prompts.fill_plan_system, &vars),
                render(host, &settings.prompts.fill_plan, &vars),
                generate_options(&settings),
            )
        };

        let profile = self
            .generator
            .resolve_profile(profile.as_deref())
            .map_err(TimelineError::from_generator)?;
        self.limiter.acquire().await;
        Ok(self
            .generator
            .generate(&profile.id, Prompt::new(Some(system), user), options)
            .await?)
    }
}
