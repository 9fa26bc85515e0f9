//! Chapter bookkeeping and the model-backed operations built on it.
//!
//! [`TimelineEngine`] wires one conversation's [`Timeline`] to a shared
//! [`Generator`] and [`RateLimiter`] and hands out the components that need
//! them: sealing, queries, static fill, macros, arc analysis and transcript
//! cleanup. Components are cheap clones over shared state.

pub mod arc;
pub mod chunk;
pub mod cleanup;
pub mod error;
pub mod fill;
pub mod json;
pub mod macros;
pub mod prompt;
pub mod query;
pub mod rate_limit;
pub mod results;
pub mod sealer;
pub mod timeline;

pub use arc::{ArcAnalyzer, ArcProposal};
pub use chunk::ChunkPlanner;
pub use cleanup::{ToolCallCleanup, TranscriptCleanup};
pub use error::{QueryError, TimelineError};
pub use fill::{PlanTarget, QueryPlan, TimelineFill};
pub use macros::MacroRegistry;
pub use query::QueryEngine;
pub use rate_limit::RateLimiter;
pub use results::FillResults;
pub use sealer::{ChapterSealer, SealRequest};
pub use timeline::{HistoryLine, MigrationReport, Timeline, Violation};

use timeline_core::{Host, SharedSettings};
use timeline_llm::Generator;

#[derive(Clone)]
pub struct TimelineEngine {
    timeline: Timeline,
    generator: Generator,
    limiter: RateLimiter,
    results: FillResults,
}

impl TimelineEngine {
    pub fn new(host: Host, settings: SharedSettings) -> Self {
        let generator = Generator::new(host.profiles.clone());
        let limiter = RateLimiter::new(settings.clone());
        Self {
            timeline: Timeline::new(host, settings),
            generator,
            limiter,
            results: FillResults::default(),
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn results(&self) -> &FillResults {
        &self.results
    }

    pub fn sealer(&self) -> ChapterSealer {
        ChapterSealer::new(
            self.timeline.clone(),
            self.generator.clone(),
            self.limiter.clone(),
        )
    }

    pub fn queries(&self) -> QueryEngine {
        QueryEngine::new(
            self.timeline.clone(),
            self.generator.clone(),
            self.limiter.clone(),
        )
    }

    pub fn fill(&self) -> TimelineFill {
        TimelineFill::new(
            self.timeline.clone(),
            self.generator.clone(),
            self.limiter.clone(),
            self.queries(),
            self.results.clone(),
        )
    }

    pub fn macros(&self) -> MacroRegistry {
        MacroRegistry::new(self.timeline.clone(), self.results.clone())
    }

    pub fn arcs(&self) -> ArcAnalyzer {
        ArcAnalyzer::new(
            self.timeline.clone(),
            self.generator.clone(),
            self.limiter.clone(),
        )
    }

    pub fn cleanup(&self) -> TranscriptCleanup {
        TranscriptCleanup::new(self.timeline.clone())
    }
}
