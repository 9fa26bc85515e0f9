use std::sync::Arc;

use timeline_core::{FillMode, Host, HostEvent, NoticeLevel, SharedSettings};
use timeline_engine::{SealRequest, TimelineEngine};
use timeline_session::{SessionManager, SessionOutcome};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::command::{self, TimelineCommand};
use crate::error::{CommandError, Result};

/// Everything the timeline contributes to one host: macros, slash commands,
/// event reactions and the two tool-driven sessions.
#[derive(Clone)]
pub struct TimelineMemory {
    host: Host,
    engine: TimelineEngine,
    sessions: Arc<SessionManager>,
}

impl TimelineMemory {
    pub fn new(host: Host, settings: SharedSettings) -> Self {
        let sessions = SessionManager::new(host.clone(), settings.clone());
        Self::with_sessions(host, settings, sessions)
    }

    pub fn with_sessions(host: Host, settings: SharedSettings, sessions: SessionManager) -> Self {
        Self {
            engine: TimelineEngine::new(host.clone(), settings),
            host,
            sessions: Arc::new(sessions),
        }
    }

    pub fn engine(&self) -> &TimelineEngine {
        &self.engine
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Registers macros and slash commands with whichever registrars the
    /// host offers.
    pub fn install(&self) {
        match &self.host.macros {
            Some(registrar) => self.engine.macros().register(registrar.as_ref()),
            None => log::warn!("[timeline] host has no macro registrar; prompt macros unavailable"),
        }
        match &self.host.slash_commands {
            Some(registrar) => {
                for spec in command::catalogue() {
                    registrar.register_command(spec);
                }
            }
            None => log::warn!("[timeline] host has no command registrar; slash commands unavailable"),
        }
        if self.host.tools.is_none() {
            log::warn!("[timeline] host has no tool manager; agentic sessions are disabled");
        }
    }

    /// Feeds host events into [`TimelineMemory::handle_event`] until the bus
    /// closes.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let memory = self.clone();
        let mut events = self.host.events.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => memory.handle_event(&event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[timeline] event listener skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn handle_event(&self, event: &HostEvent) {
        match event {
            HostEvent::ChatChanged(chat_id) => {
                log::debug!("[{}] chat changed", chat_id);
                self.engine.results().clear();
                self.engine.timeline().set_current_chat_content(None);
                self.sessions.abort_all("the conversation was changed").await;
                self.sessions.release_inactive();
                self.on_chat_loaded().await;
            }
            HostEvent::MessageSent(index) | HostEvent::UserMessageRendered(index) => {
                // Session seed prompts are user messages too.
                if self.sessions.active_kind().is_some() {
                    return;
                }
                let is_user = self
                    .host
                    .conversation()
                    .read()
                    .messages
                    .get(*index)
                    .is_some_and(|message| message.is_user);
                if is_user && !self.engine.results().is_empty() {
                    log::debug!("[{}] new user message, clearing fill results", self.host.chat_id());
                    self.engine.results().clear();
                }
            }
            _ => {}
        }
    }

    /// Migrates legacy data and unwinds sessions interrupted by a crash.
    pub async fn on_chat_loaded(&self) {
        match self.engine.timeline().migrate_and_save().await {
            Ok(report) if report.changed() => {
                log::info!("[{}] {}", self.host.chat_id(), report);
            }
            Ok(_) => {}
            Err(err) => log::warn!("[{}] timeline migration failed: {}", self.host.chat_id(), err),
        }
        match self.sessions.recover().await {
            Ok(report) if !report.is_empty() => {
                log::info!("[{}] session recovery: {:?}", self.host.chat_id(), report);
            }
            Ok(_) => {}
            Err(err) => log::warn!("[{}] session recovery failed: {}", self.host.chat_id(), err),
        }
    }

    /// Parses and runs one slash command line.
    pub async fn dispatch(&self, line: &str) -> Result<String> {
        let command = TimelineCommand::parse(line)?;
        log::debug!("[{}] {:?}", self.host.chat_id(), command);
        self.execute(command).await
    }

    pub async fn execute(&self, command: TimelineCommand) -> Result<String> {
        let timeline = self.engine.timeline();
        match command {
            TimelineCommand::ChapterEnd {
                message_id,
                title,
                profile,
            } => {
                let end_msg_id = match message_id {
                    Some(id) => id,
                    None => self
                        .host
                        .message_count()
                        .checked_sub(1)
                        .ok_or(CommandError::EmptyTranscript)?,
                };
                let chapter = self
                    .engine
                    .sealer()
                    .seal(SealRequest {
                        end_msg_id,
                        title,
                        profile,
                    })
                    .await?;
                Ok(format!(
                    "Sealed chapter {} (messages {}-{})",
                    timeline.len(),
                    chapter.start_msg_id,
                    chapter.end_msg_id
                ))
            }
            TimelineCommand::Query { chapter, query } => {
                Ok(self.engine.queries().query_chapter(chapter, &query).await)
            }
            TimelineCommand::QueryRange { start, end, query } => {
                Ok(self.engine.queries().query_chapters(start, end, &query).await)
            }
            TimelineCommand::Fill { wait } => self.fill(wait).await,
            TimelineCommand::FillResults => {
                Ok(serde_json::to_string_pretty(&self.engine.results().snapshot())?)
            }
            TimelineCommand::RemoveMarker { message_id } => {
                Ok(match timeline.remove_marker(message_id).await? {
                    Some(chapter) => format!(
                        "Removed the chapter covering messages {}-{}",
                        chapter.start_msg_id, chapter.end_msg_id
                    ),
                    None => format!("Cleared a stray chapter marker at message {}", message_id),
                })
            }
            TimelineCommand::RemoveChapter { number } => {
                let chapter = timeline.remove_chapter_number(number).await?;
                Ok(format!(
                    "Removed chapter {} (messages {}-{})",
                    number, chapter.start_msg_id, chapter.end_msg_id
                ))
            }
            TimelineCommand::Migrate => {
                let report = timeline.migrate_and_save().await?;
                Ok(report.to_string())
            }
            TimelineCommand::Summary { number } => Ok(timeline.chapter_summary(number)?),
            TimelineCommand::Resummarize { number, profile } => {
                let chapter = self
                    .engine
                    .sealer()
                    .resummarize(number, profile.as_deref())
                    .await?;
                Ok(chapter.summary)
            }
            TimelineCommand::ArcAnalyzer { profile, apply } => {
                let analyzer = self.engine.arcs();
                let arcs = analyzer.analyze(profile.as_deref()).await?;
                if apply {
                    let sealed = analyzer.apply(&arcs).await?;
                    Ok(format!("Sealed {} chapters from arc analysis", sealed.len()))
                } else {
                    Ok(serde_json::to_string_pretty(&arcs)?)
                }
            }
            TimelineCommand::RemoveReasoning { range } => {
                let (start, end) = match range {
                    Some(range) => range,
                    None => (
                        0,
                        self.host
                            .message_count()
                            .checked_sub(1)
                            .ok_or(CommandError::EmptyTranscript)?,
                    ),
                };
                let template = self
                    .host
                    .profiles
                    .selected_profile()
                    .and_then(|profile| profile.reasoning_template);
                let changed = self
                    .engine
                    .cleanup()
                    .strip_reasoning(start, end, template.as_ref())
                    .await?;
                Ok(format!("Removed reasoning from {} messages", changed))
            }
            TimelineCommand::RemoveToolCalls => {
                let cleanup = self.engine.cleanup().remove_tool_calls().await?;
                Ok(format!(
                    "Removed {} tool call messages ({} kept at chapter ends)",
                    cleanup.removed, cleanup.skipped
                ))
            }
            TimelineCommand::ManageLore { wait } => {
                if wait {
                    let outcome = self.sessions.start_lore(&self.engine).await?;
                    Ok(describe(&outcome))
                } else {
                    let memory = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = memory.sessions.start_lore(&memory.engine).await {
                            log::warn!("[timeline] lore session did not start: {}", err);
                        }
                    });
                    Ok(String::new())
                }
            }
        }
    }

    /// Static mode answers planned queries; agentic mode hands the model the
    /// query tools. Either way the answers land in the fill results.
    async fn fill(&self, wait: bool) -> Result<String> {
        let mode = self.engine.timeline().settings().read().timeline_fill.mode;
        if !wait {
            let memory = self.clone();
            tokio::spawn(async move {
                if let Err(err) = memory.run_fill(mode).await {
                    memory
                        .host
                        .notify(NoticeLevel::Warning, format!("Timeline fill failed: {}", err));
                }
            });
            return Ok(String::new());
        }
        self.run_fill(mode).await?;
        Ok(self.engine.results().format_for_injection())
    }

    async fn run_fill(&self, mode: FillMode) -> Result<()> {
        match mode {
            FillMode::Static => {
                self.engine.fill().run().await?;
            }
            FillMode::Agentic => {
                let outcome = self.sessions.start_agentic(&self.engine).await?;
                log::info!("[{}] {}", self.host.chat_id(), describe(&outcome));
            }
        }
        Ok(())
    }
}

fn describe(outcome: &SessionOutcome) -> String {
    match outcome {
        SessionOutcome::Completed => "Session completed".to_string(),
        SessionOutcome::Aborted(reason) => format!("Session aborted: {}", reason),
    }
}
