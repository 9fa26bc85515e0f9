//! Agentic retrieval: a session model queries the timeline through tools and
//! hands back the information the next reply needs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use timeline_core::tools::{FunctionTool, Tool, ToolError, ToolResult};
use timeline_core::TimelineFillResult;
use timeline_engine::{QueryEngine, TimelineEngine};

use crate::args::{flexible_usize, parse_args};
use crate::error::Result;
use crate::runtime::{SessionProgram, SessionRuntime};
use crate::world::BoundWorld;

pub const QUERY_CHAPTER: &str = "query_timeline_chapter";
pub const QUERY_CHAPTERS: &str = "query_timeline_chapters";
pub const LIST_LOREBOOK: &str = "list_lorebook_entries";
pub const END_RETRIEVAL: &str = "end_information_retrieval";

#[derive(Clone)]
pub struct AgenticRetrieval {
    engine: TimelineEngine,
}

impl AgenticRetrieval {
    pub fn new(engine: TimelineEngine) -> Self {
        Self { engine }
    }

    /// The visible transcript as a JSON array, for the `currentChat` macro.
    fn snapshot_current_chat(&self) -> String {
        let messages: Vec<Value> = self.engine.timeline().store().with_messages(|messages| {
            messages
                .iter()
                .filter(|message| !message.is_hidden())
                .map(|message| {
                    json!({
                        "name": message.name,
                        "is_user": message.is_user,
                        "mes": message.mes,
                    })
                })
                .collect()
        });
        serde_json::to_string(&messages).unwrap_or_else(|_| "[]".to_string())
    }
}

#[async_trait]
impl SessionProgram for AgenticRetrieval {
    fn profile(&self) -> Option<String> {
        let settings = self.engine.timeline().settings().read();
        settings
            .agentic
            .profile
            .clone()
            .or_else(|| settings.query_profile().map(str::to_string))
    }

    async fn prepare(&self) -> Result<()> {
        let snapshot = self.snapshot_current_chat();
        self.engine.timeline().set_current_chat_content(Some(snapshot));
        Ok(())
    }

    fn seed_prompt(&self) -> String {
        let template = self.engine.timeline().settings().read().agentic.seed_prompt.clone();
        self.engine.macros().expand(&template)
    }

    fn tools(&self, session: &SessionRuntime) -> Vec<FunctionTool> {
        let queries = self.engine.queries();
        vec![
            FunctionTool::new(Arc::new(QueryChapterTool {
                queries: queries.clone(),
                session: session.clone(),
            }))
            .with_format_message("Querying the timeline"),
            FunctionTool::new(Arc::new(QueryChaptersTool {
                queries,
                session: session.clone(),
            }))
            .with_format_message("Querying the timeline"),
            FunctionTool::new(Arc::new(ListLorebookTool {
                session: session.clone(),
            })),
            FunctionTool::new(Arc::new(EndRetrievalTool {
                engine: self.engine.clone(),
                session: session.clone(),
            }))
            .stealth(),
        ]
    }
}

#[derive(Debug, Deserialize)]
struct ChapterQueryArgs {
    #[serde(deserialize_with = "flexible_usize")]
    chapter: usize,
    query: String,
}

struct QueryChapterTool {
    queries: QueryEngine,
    session: SessionRuntime,
}

#[async_trait]
impl Tool for QueryChapterTool {
    fn name(&self) -> &str {
        QUERY_CHAPTER
    }

    fn description(&self) -> &str {
        "Ask a question about one chapter of the story. The answer is drawn from the chapter's full messages."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "chapter": {"type": "integer", "description": "Chapter number, starting at 1"},
                "query": {"type": "string", "description": "What to find out"}
            },
            "required": ["chapter", "query"]
        })
    }

    async fn execute(&self, args: Value) -> std::result::Result<ToolResult, ToolError> {
        let args: ChapterQueryArgs = parse_args(args)?;
        match self.queries.try_query_chapter(args.chapter, &args.query).await {
            Ok(answer) => {
                self.session.record_tool_success();
                Ok(ToolResult::ok(answer))
            }
            Err(err) => Ok(ToolResult::failed(err.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RangeQueryArgs {
    #[serde(deserialize_with = "flexible_usize")]
    start_chapter: usize,
    #[serde(deserialize_with = "flexible_usize")]
    end_chapter: usize,
    query: String,
}

struct QueryChaptersTool {
    queries: QueryEngine,
    session: SessionRuntime,
}

#[async_trait]
impl Tool for QueryChaptersTool {
    fn name(&self) -> &str {
        QUERY_CHAPTERS
    }

    fn description(&self) -> &str {
        "Ask a question spanning a range of chapters. The answer is drawn from their full messages."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start_chapter": {"type": "integer", "description": "First chapter, starting at 1"},
                "end_chapter": {"type": "integer", "description": "Last chapter, inclusive"},
                "query": {"type": "string", "description": "What to find out"}
            },
            "required": ["start_chapter", "end_chapter", "query"]
        })
    }

    async fn execute(&self, args: Value) -> std::result::Result<ToolResult, ToolError> {
        let args: RangeQueryArgs = parse_args(args)?;
        match self
            .queries
            .try_query_chapters(args.start_chapter, args.end_chapter, &args.query)
            .await
        {
            Ok(answer) => {
                self.session.record_tool_success();
                Ok(ToolResult::ok(answer))
            }
            Err(err) => Ok(ToolResult::failed(err.to_string())),
        }
    }
}

struct ListLorebookTool {
    session: SessionRuntime,
}

#[async_trait]
impl Tool for ListLorebookTool {
    fn name(&self) -> &str {
        LIST_LOREBOOK
    }

    fn description(&self) -> &str {
        "List the lorebook entries bound to the current character."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value) -> std::result::Result<ToolResult, ToolError> {
        let Some(world) = BoundWorld::resolve(self.session.host()) else {
            return Ok(ToolResult::failed("No lorebook is bound to the current character"));
        };
        match world.entries_json().await {
            Ok(entries) => {
                self.session.record_tool_success();
                Ok(ToolResult::ok(entries))
            }
            Err(err) => Ok(ToolResult::failed(err.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EndRetrievalArgs {
    final_information: String,
}

struct EndRetrievalTool {
    engine: TimelineEngine,
    session: SessionRuntime,
}

#[async_trait]
impl Tool for EndRetrievalTool {
    fn name(&self) -> &str {
        END_RETRIEVAL
    }

    fn description(&self) -> &str {
        "Finish retrieval and hand over everything relevant to the next reply."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "final_information": {
                    "type": "string",
                    "description": "All information gathered that the next reply needs"
                }
            },
            "required": ["final_information"]
        })
    }

    async fn execute(&self, args: Value) -> std::result::Result<ToolResult, ToolError> {
        let args: EndRetrievalArgs = parse_args(args)?;
        self.engine
            .results()
            .replace(vec![TimelineFillResult::agentic(args.final_information)]);
        self.session.request_end();
        Ok(ToolResult::ok("Information retrieval complete"))
    }
}
