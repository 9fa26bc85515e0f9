//! The single-flight state machine behind every autonomous session.
//!
//! ```text
//! IDLE --start()--> ACTIVE --terminator tool--> CLEANUP --> IDLE
//! ACTIVE --abort()/fatal--> CLEANUP --> IDLE
//! IDLE + stale checkpoint --recover()--> CLEANUP --> IDLE
//! ```
//!
//! The host keeps generating after successful tool calls on its own; the
//! runtime only watches for generations that end without one and retries
//! those. Every suspension is followed by a check of `active` and
//! `end_requested`, and retry tasks additionally bail once a newer dead end
//! or a tool success has superseded them.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use timeline_core::host::{HostCommand, HostEvent, NoticeLevel};
use timeline_core::tools::{FunctionTool, ToolManager};
use timeline_core::{Host, SessionCheckpoint, SessionKind, Store};
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SessionError};
use crate::policy::{RetrySchedule, SwapSettlePolicy};

/// How a started session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The model called the terminator tool.
    Completed,
    Aborted(String),
}

/// What a particular kind of session contributes to the shared runtime.
#[async_trait]
pub trait SessionProgram: Send + Sync {
    /// Configured profile id or name for the session model.
    fn profile(&self) -> Option<String>;

    /// Runs before any state is touched. Errors abort the start.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// User message that opens the session.
    fn seed_prompt(&self) -> String;

    /// Session-scoped tools. The runtime gates them on the session being active.
    fn tools(&self, session: &SessionRuntime) -> Vec<FunctionTool>;
}

#[derive(Default)]
struct SessionState {
    active: bool,
    end_requested: bool,
    cleaning: bool,
    retries: usize,
    /// Bumped on every dead end and tool success; retry tasks compare it.
    epoch: u64,
    checkpoint: Option<SessionCheckpoint>,
    tools: Vec<String>,
    monitor: Option<CancellationToken>,
    completion: Option<oneshot::Sender<SessionOutcome>>,
}

struct Inner {
    kind: SessionKind,
    host: Host,
    store: Store,
    swap: SwapSettlePolicy,
    schedule: RetrySchedule,
    state: Mutex<SessionState>,
}

#[derive(Clone)]
pub struct SessionRuntime {
    inner: Arc<Inner>,
}

impl SessionRuntime {
    pub fn new(
        kind: SessionKind,
        host: Host,
        swap: SwapSettlePolicy,
        schedule: RetrySchedule,
    ) -> Self {
        let store = Store::new(host.chat.clone());
        Self {
            inner: Arc::new(Inner {
                kind,
                host,
                store,
                swap,
                schedule,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.inner.kind
    }

    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn is_end_requested(&self) -> bool {
        self.inner.state.lock().end_requested
    }

    pub fn retries(&self) -> usize {
        self.inner.state.lock().retries
    }

    pub fn checkpoint(&self) -> Option<SessionCheckpoint> {
        self.inner.state.lock().checkpoint.clone()
    }

    fn chat_id(&self) -> String {
        self.inner.store.chat_id()
    }

    fn interrupted(&self) -> bool {
        let state = self.inner.state.lock();
        !state.active || state.end_requested
    }

    fn superseded(&self, epoch: u64) -> bool {
        let state = self.inner.state.lock();
        !state.active || state.end_requested || state.epoch != epoch
    }

    /// Runs a session to completion. Resolves once cleanup has finished.
    ///
    /// Errors are returned only when the session never became active;
    /// failures after that point abort the session and resolve with
    /// [`SessionOutcome::Aborted`].
    pub async fn start(&self, program: Arc<dyn SessionProgram>) -> Result<SessionOutcome> {
        let kind = self.inner.kind;
        let host = &self.inner.host;

        let Some(tools) = host.tools.clone() else {
            host.notify(
                NoticeLevel::Warning,
                format!("Cannot start the {} session: the host has no tool support", kind),
            );
            return Err(SessionError::ToolsUnavailable(kind));
        };
        if self.is_active() {
            return Err(SessionError::AlreadyActive(kind));
        }

        self.inner.store.create_backup().await?;

        let requested = program.profile();
        let Some(profile) = requested
            .as_deref()
            .and_then(|name| host.profiles.find_profile(name))
        else {
            let reason = match &requested {
                Some(name) => format!("profile `{}` not found", name),
                None => "no profile configured".to_string(),
            };
            host.notify(
                NoticeLevel::Error,
                format!("Cannot start the {} session: {}", kind, reason),
            );
            return Err(SessionError::ProfileUnresolved { kind, reason });
        };

        program.prepare().await?;

        let (checkpoint, completion) = {
            let mut state = self.inner.state.lock();
            if state.active {
                return Err(SessionError::AlreadyActive(kind));
            }
            let checkpoint = self.snapshot_checkpoint();
            let (sender, receiver) = oneshot::channel();
            *state = SessionState {
                active: true,
                epoch: state.epoch + 1,
                checkpoint: Some(checkpoint.clone()),
                completion: Some(sender),
                ..Default::default()
            };
            (checkpoint, receiver)
        };

        log::info!(
            "[{}] starting {} session with profile {} (start index {}, hidden {:?})",
            checkpoint.session_chat_id,
            kind,
            profile.name,
            checkpoint.start_message_index,
            checkpoint.hidden_range()
        );

        if let Err(err) = self
            .begin(program.as_ref(), &tools, &profile.name, &checkpoint)
            .await
        {
            log::warn!("[{}] {} session failed to start: {}", self.chat_id(), kind, err);
            self.abort(format!("failed to start: {}", err)).await;
        }

        Ok(completion
            .await
            .unwrap_or_else(|_| SessionOutcome::Aborted("session dropped".to_string())))
    }

    async fn begin(
        &self,
        program: &dyn SessionProgram,
        tools: &Arc<dyn ToolManager>,
        profile_name: &str,
        checkpoint: &SessionCheckpoint,
    ) -> Result<()> {
        let host = &self.inner.host;

        if let Some((start, end)) = checkpoint.hidden_range() {
            host.run(HostCommand::Hide { start, end }).await?;
        }
        if self.interrupted() {
            return Ok(());
        }

        self.inner.store.put_checkpoint(self.inner.kind, checkpoint)?;
        self.inner.store.save_conversation().await?;
        if self.interrupted() {
            return Ok(());
        }

        self.register_tools(program.tools(self), tools)?;

        let waiter = self.inner.swap.arm(&host.events);
        host.run(HostCommand::Profile {
            name: Some(profile_name.to_string()),
        })
        .await?;
        self.inner.swap.settle(waiter).await;
        if self.interrupted() {
            return Ok(());
        }

        let seed = host.formatter.substitute(&program.seed_prompt());
        host.run(HostCommand::Send { text: seed }).await?;
        if self.interrupted() {
            return Ok(());
        }

        self.spawn_monitor();
        if let Err(err) = host.run(HostCommand::Trigger).await {
            log::warn!("[{}] first generation failed: {}", self.chat_id(), err);
            self.on_dead_end();
        }
        Ok(())
    }

    fn snapshot_checkpoint(&self) -> SessionCheckpoint {
        let saved = self.inner.host.profiles.selected_profile();
        let conversation = self.inner.store.conversation();
        let conversation = conversation.read();
        let hidden_start = conversation.first_visible_index();
        SessionCheckpoint {
            active: true,
            saved_profile_id: saved.as_ref().map(|profile| profile.id.clone()),
            saved_profile_name: saved.map(|profile| profile.name),
            start_message_index: conversation.len(),
            hidden_message_start: hidden_start,
            hidden_message_end: hidden_start.and(conversation.last_index()),
            session_chat_id: conversation.chat_id.clone(),
        }
    }

    fn register_tools(
        &self,
        program_tools: Vec<FunctionTool>,
        manager: &Arc<dyn ToolManager>,
    ) -> Result<()> {
        for tool in program_tools {
            let name = tool.name().to_string();
            let inner: Weak<Inner> = Arc::downgrade(&self.inner);
            let tool = tool.gated(Arc::new(move || {
                inner
                    .upgrade()
                    .is_some_and(|inner| inner.state.lock().active)
            }));

            if manager.register_function_tool(tool.clone()).is_err() {
                // Left over from a session that never cleaned up.
                manager.unregister_function_tool(&name);
                manager.register_function_tool(tool)?;
            }
            log::debug!("[{}] registered session tool {}", self.chat_id(), name);
            self.inner.state.lock().tools.push(name);
        }
        Ok(())
    }

    fn spawn_monitor(&self) {
        let token = CancellationToken::new();
        let mut events = self.inner.host.events.subscribe();
        if let Some(previous) = self.inner.state.lock().monitor.replace(token.clone()) {
            previous.cancel();
        }

        let runtime = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(HostEvent::GenerationEnded(index)) => runtime.on_generation_ended(index),
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("[{}] generation monitor skipped {} events", runtime.chat_id(), skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            log::debug!("[{}] generation monitor stopped", runtime.inner.kind);
        });
    }

    fn on_generation_ended(&self, index: usize) {
        if self.interrupted() {
            return;
        }
        let called_tool = self
            .inner
            .store
            .with_messages(|messages| messages.get(index).map(|message| message.has_tool_calls()));
        if called_tool == Some(false) {
            self.on_dead_end();
        }
    }

    /// Counts a generation that produced no tool call and schedules a retry,
    /// or aborts once the retry budget is spent.
    fn on_dead_end(&self) {
        let (retries, epoch) = {
            let mut state = self.inner.state.lock();
            if !state.active || state.end_requested {
                return;
            }
            state.retries += 1;
            state.epoch += 1;
            (state.retries, state.epoch)
        };

        let runtime = self.clone();
        if retries > self.inner.schedule.max_retries {
            log::warn!(
                "[{}] {} session hit {} dead ends",
                self.chat_id(),
                self.inner.kind,
                retries
            );
            tokio::spawn(async move { runtime.abort("model failed to call a tool").await });
            return;
        }

        log::info!(
            "[{}] generation ended without a tool call, retry {}/{}",
            self.chat_id(),
            retries,
            self.inner.schedule.max_retries
        );
        tokio::spawn(async move { runtime.retry(epoch).await });
    }

    /// Restarts generation after a dead end: swipes first, then triggers.
    async fn retry(&self, epoch: u64) {
        let schedule = &self.inner.schedule;
        let host = &self.inner.host;

        for (attempt, delay) in schedule.backoff.iter().enumerate() {
            if attempt == 0 {
                tokio::time::sleep(schedule.ui_settle).await;
            }
            tokio::time::sleep(*delay).await;
            if self.superseded(epoch) {
                return;
            }

            if let Err(err) = self.inner.store.reload_conversation().await {
                log::warn!("[{}] reload before swipe failed: {}", self.chat_id(), err);
            }
            if !self.wait_until_swipe_allowed(epoch).await {
                if self.superseded(epoch) {
                    return;
                }
                log::warn!(
                    "[{}] swiping not allowed within {:?}",
                    self.chat_id(),
                    schedule.swipe_ready_timeout
                );
                continue;
            }

            match host.generation.swipe_right().await {
                Ok(()) => return,
                Err(err) => log::warn!(
                    "[{}] swipe attempt {} failed: {}",
                    self.chat_id(),
                    attempt + 1,
                    err
                ),
            }
        }

        for (attempt, delay) in schedule.backoff.iter().enumerate() {
            tokio::time::sleep(*delay).await;
            if self.superseded(epoch) {
                return;
            }
            match host.run(HostCommand::Trigger).await {
                Ok(_) => return,
                Err(err) => log::warn!(
                    "[{}] trigger attempt {} failed: {}",
                    self.chat_id(),
                    attempt + 1,
                    err
                ),
            }
        }

        if !self.superseded(epoch) {
            self.abort("could not restart generation").await;
        }
    }

    async fn wait_until_swipe_allowed(&self, epoch: u64) -> bool {
        let schedule = &self.inner.schedule;
        let deadline = Instant::now() + schedule.swipe_ready_timeout;
        loop {
            if self.superseded(epoch) {
                return false;
            }
            if self.inner.host.generation.is_swiping_allowed() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(schedule.swipe_poll).await;
        }
    }

    /// A successful non-terminator tool call: the model is making progress.
    pub fn record_tool_success(&self) {
        let mut state = self.inner.state.lock();
        if state.active {
            state.retries = 0;
            state.epoch += 1;
        }
    }

    /// Called by a terminator tool. Stops the monitor now and cleans up on a
    /// later task so the tool's reply is delivered first.
    pub fn request_end(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.active || state.end_requested {
                return;
            }
            state.end_requested = true;
            if let Some(monitor) = state.monitor.take() {
                monitor.cancel();
            }
        }
        log::info!("[{}] {} session end requested", self.chat_id(), self.inner.kind);

        let runtime = self.clone();
        tokio::spawn(async move {
            runtime.inner.host.generation.stop_generation().await;
            tokio::task::yield_now().await;
            runtime.cleanup(SessionOutcome::Completed).await;
        });
    }

    /// Ends an active session with a user-visible error.
    pub async fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut state = self.inner.state.lock();
            if !state.active || state.end_requested {
                return;
            }
            state.end_requested = true;
            if let Some(monitor) = state.monitor.take() {
                monitor.cancel();
            }
        }

        self.inner.host.generation.stop_generation().await;
        self.inner.host.notify(
            NoticeLevel::Error,
            format!("The {} session was aborted: {}", self.inner.kind, reason),
        );
        self.cleanup(SessionOutcome::Aborted(reason)).await;
    }

    async fn cleanup(&self, outcome: SessionOutcome) {
        let (checkpoint, tools, monitor) = {
            let mut state = self.inner.state.lock();
            if !state.active || state.cleaning {
                return;
            }
            state.cleaning = true;
            (
                state.checkpoint.clone(),
                std::mem::take(&mut state.tools),
                state.monitor.take(),
            )
        };
        if let Some(monitor) = monitor {
            monitor.cancel();
        }

        if let Some(manager) = &self.inner.host.tools {
            for name in &tools {
                manager.unregister_function_tool(name);
            }
        }

        if let Some(checkpoint) = &checkpoint {
            let chat_id = self.chat_id();
            if !checkpoint.belongs_to(&chat_id) {
                // The transcript that was loaded is not the session's; its
                // checkpoint stays behind and is recovered when that chat loads.
                log::warn!(
                    "[{}] {} session was started in {}; leaving its transcript to recovery",
                    chat_id,
                    self.inner.kind,
                    checkpoint.session_chat_id
                );
                if let Err(err) = self.restore_profile(checkpoint).await {
                    log::warn!("[{}] could not restore the saved profile: {}", chat_id, err);
                }
            } else if let Err(err) = self.unwind(checkpoint).await {
                log::warn!("[{}] {} session cleanup failed: {}", self.chat_id(), self.inner.kind, err);
                self.inner.host.notify(
                    NoticeLevel::Warning,
                    format!("Cleanup of the {} session was incomplete: {}", self.inner.kind, err),
                );
                self.inner.store.delete_checkpoint(self.inner.kind);
            }
        }

        let completion = {
            let mut state = self.inner.state.lock();
            let completion = state.completion.take();
            *state = SessionState {
                epoch: state.epoch + 1,
                ..Default::default()
            };
            completion
        };

        log::info!(
            "[{}] {} session finished: {:?}",
            self.chat_id(),
            self.inner.kind,
            outcome
        );
        if let Some(completion) = completion {
            let _ = completion.send(outcome);
        }
    }

    /// Undoes a session's footprint: truncates the transcript, unhides the
    /// hidden range, drops the checkpoint and restores the saved profile.
    async fn unwind(&self, checkpoint: &SessionCheckpoint) -> Result<()> {
        let host = &self.inner.host;
        let store = &self.inner.store;

        let len = store.message_count();
        if len > checkpoint.start_message_index {
            host.run(HostCommand::Cut {
                start: checkpoint.start_message_index,
                end: len - 1,
            })
            .await?;
        }

        if let Some((start, end)) = checkpoint.hidden_range() {
            let end = end.min(store.message_count().saturating_sub(1));
            if start <= end {
                host.run(HostCommand::Unhide { start, end }).await?;
            }
        }

        store.delete_checkpoint(self.inner.kind);
        store.save_conversation().await?;
        store.reload_conversation().await?;

        self.restore_profile(checkpoint).await
    }

    async fn restore_profile(&self, checkpoint: &SessionCheckpoint) -> Result<()> {
        let saved = checkpoint
            .saved_profile_name
            .clone()
            .or_else(|| checkpoint.saved_profile_id.clone());
        self.inner
            .host
            .run(HostCommand::Profile { name: saved })
            .await?;
        Ok(())
    }

    /// Unwinds a checkpoint left behind by a session that never cleaned up.
    /// Returns whether anything was recovered. A failed unwind still deletes
    /// the checkpoint so the next load does not retry it.
    pub async fn recover(&self) -> Result<bool> {
        let kind = self.inner.kind;
        if self.is_active() {
            return Ok(false);
        }

        let checkpoint = match self.inner.store.get_checkpoint(kind) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return Ok(false),
            Err(err) => {
                self.inner.store.delete_checkpoint(kind);
                self.inner.host.notify(
                    NoticeLevel::Warning,
                    format!("Discarded an unreadable {} session checkpoint", kind),
                );
                return Err(err.into());
            }
        };
        if !checkpoint.active {
            self.inner.store.delete_checkpoint(kind);
            return Ok(false);
        }

        log::warn!(
            "[{}] recovering crashed {} session (start index {}, hidden {:?})",
            self.chat_id(),
            kind,
            checkpoint.start_message_index,
            checkpoint.hidden_range()
        );
        if let Err(err) = self.unwind(&checkpoint).await {
            self.inner.store.delete_checkpoint(kind);
            self.inner.host.notify(
                NoticeLevel::Warning,
                format!("Recovery of the {} session failed: {}", kind, err),
            );
            return Err(SessionError::RecoveryFailed {
                kind,
                source: Box::new(err),
            });
        }

        self.inner.host.notify(
            NoticeLevel::Info,
            format!("Recovered from an interrupted {} session", kind),
        );
        Ok(true)
    }
}
