//! Session runtimes keyed by conversation.

use std::sync::Arc;

use dashmap::DashMap;
use timeline_core::host::NoticeLevel;
use timeline_core::{Host, SessionKind, SharedSettings, Store};
use timeline_engine::TimelineEngine;

use crate::agentic::AgenticRetrieval;
use crate::error::{Result, SessionError};
use crate::lore::LoreManager;
use crate::policy::{RetrySchedule, SwapSettlePolicy};
use crate::runtime::{SessionOutcome, SessionProgram, SessionRuntime};

/// What [`SessionManager::recover`] did on conversation load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub recovered: Vec<SessionKind>,
    pub failed: Vec<SessionKind>,
    /// Both kinds claimed to be active; both checkpoints were discarded.
    pub conflict: bool,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.recovered.is_empty() && self.failed.is_empty() && !self.conflict
    }
}

pub struct SessionManager {
    host: Host,
    settings: SharedSettings,
    schedule: RetrySchedule,
    swap: Option<SwapSettlePolicy>,
    sessions: DashMap<(String, SessionKind), SessionRuntime>,
}

impl SessionManager {
    pub fn new(host: Host, settings: SharedSettings) -> Self {
        Self {
            host,
            settings,
            schedule: RetrySchedule::default(),
            swap: None,
            sessions: DashMap::new(),
        }
    }

    pub fn with_schedule(mut self, schedule: RetrySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Overrides the settle policy derived from settings.
    pub fn with_swap_policy(mut self, swap: SwapSettlePolicy) -> Self {
        self.swap = Some(swap);
        self
    }

    /// The runtime for `kind` in the host's current conversation.
    pub fn runtime(&self, kind: SessionKind) -> SessionRuntime {
        let key = (self.host.chat_id(), kind);
        self.sessions
            .entry(key)
            .or_insert_with(|| {
                let swap = self
                    .swap
                    .unwrap_or_else(|| SwapSettlePolicy::from_settings(&self.settings.read()));
                SessionRuntime::new(kind, self.host.clone(), swap, self.schedule.clone())
            })
            .clone()
    }

    pub fn active_kind(&self) -> Option<SessionKind> {
        let chat_id = self.host.chat_id();
        SessionKind::ALL.into_iter().find(|kind| {
            self.sessions
                .get(&(chat_id.clone(), *kind))
                .is_some_and(|runtime| runtime.is_active())
        })
    }

    pub async fn start_agentic(&self, engine: &TimelineEngine) -> Result<SessionOutcome> {
        self.start(
            SessionKind::AgenticRetrieval,
            Arc::new(AgenticRetrieval::new(engine.clone())),
        )
        .await
    }

    pub async fn start_lore(&self, engine: &TimelineEngine) -> Result<SessionOutcome> {
        self.start(
            SessionKind::LoreManagement,
            Arc::new(LoreManager::new(engine.clone())),
        )
        .await
    }

    async fn start(
        &self,
        kind: SessionKind,
        program: Arc<dyn SessionProgram>,
    ) -> Result<SessionOutcome> {
        if let Some(active) = self.active_kind().filter(|active| *active != kind) {
            self.host.notify(
                NoticeLevel::Warning,
                format!("Cannot start the {} session while the {} session is running", kind, active),
            );
            return Err(SessionError::Conflict {
                requested: kind,
                active,
            });
        }
        self.runtime(kind).start(program).await
    }

    /// Aborts whichever session is running in the current conversation.
    pub async fn abort(&self, reason: &str) {
        if let Some(kind) = self.active_kind() {
            self.runtime(kind).abort(reason).await;
        }
    }

    /// Aborts every running session, including ones started in a
    /// conversation that is no longer loaded.
    pub async fn abort_all(&self, reason: &str) {
        let running: Vec<SessionRuntime> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.value().clone())
            .collect();
        for runtime in running {
            runtime.abort(reason).await;
        }
    }

    /// Unwinds sessions that were active when the conversation was last
    /// saved. Two active checkpoints are treated as corrupt: both are
    /// dropped without touching the transcript.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let store = Store::new(self.host.chat.clone());
        let mut report = RecoveryReport::default();

        let crashed: Vec<SessionKind> = SessionKind::ALL
            .into_iter()
            .filter(|kind| !self.runtime(*kind).is_active())
            .filter(|kind| {
                matches!(store.get_checkpoint(*kind), Ok(Some(checkpoint)) if checkpoint.active)
            })
            .collect();

        if crashed.len() == SessionKind::ALL.len() {
            for kind in &crashed {
                store.delete_checkpoint(*kind);
            }
            store.save_conversation().await?;
            log::warn!(
                "[{}] both session checkpoints were active; discarded them",
                store.chat_id()
            );
            self.host.notify(
                NoticeLevel::Warning,
                "Conflicting session checkpoints were found and discarded. Restore from the chat backup if the transcript looks wrong.",
            );
            report.conflict = true;
            return Ok(report);
        }

        for kind in SessionKind::ALL {
            match self.runtime(kind).recover().await {
                Ok(true) => report.recovered.push(kind),
                Ok(false) => {}
                Err(err) => {
                    log::warn!("[{}] {}", store.chat_id(), err);
                    report.failed.push(kind);
                }
            }
        }
        Ok(report)
    }

    /// Drops idle runtimes of conversations other than the current one.
    pub fn release_inactive(&self) {
        let chat_id = self.host.chat_id();
        self.sessions
            .retain(|(chat, _), runtime| *chat == chat_id || runtime.is_active());
    }
}
