//! Capability interfaces the host application provides.
//!
//! The timeline core never talks to the model provider, the UI or the chat
//! file directly; everything goes through these traits. Optional
//! capabilities (`tools`, `world_info`, `macros`, `slash_commands`) may be
//! missing, and callers degrade instead of failing.

pub mod chat;
pub mod commands;
pub mod events;
pub mod format;
pub mod generation;
pub mod interaction;
pub mod memory;
pub mod profiles;
pub mod registrars;
pub mod world_info;

use std::sync::Arc;

pub use chat::{ChatHost, SharedConversation};
pub use commands::{CommandExecutor, HostCommand};
pub use events::{EventBus, EventKind, EventWaiter, HostEvent};
pub use format::{PersonaFormatter, PromptFormatter};
pub use generation::GenerationControl;
pub use interaction::{Interaction, NoticeLevel, RetryDecision};
pub use profiles::{
    ConnectionProfile, ProfileRequest, ProfileService, PromptMessage, PromptRole,
    ReasoningTemplate,
};
pub use registrars::{CommandRegistrar, MacroFn, MacroRegistrar, SlashCommandSpec};
pub use world_info::{WorldInfoBook, WorldInfoEntry, WorldInfoStore};

use crate::error::HostError;
use crate::tokens::TokenCounter;
use crate::tools::ToolManager;

/// Bundle of host capabilities handed to every component.
#[derive(Clone)]
pub struct Host {
    pub chat: Arc<dyn ChatHost>,
    pub commands: Arc<dyn CommandExecutor>,
    pub profiles: Arc<dyn ProfileService>,
    pub generation: Arc<dyn GenerationControl>,
    pub interaction: Arc<dyn Interaction>,
    pub formatter: Arc<dyn PromptFormatter>,
    pub tokens: Arc<dyn TokenCounter>,
    pub events: EventBus,
    pub tools: Option<Arc<dyn ToolManager>>,
    pub world_info: Option<Arc<dyn WorldInfoStore>>,
    pub macros: Option<Arc<dyn MacroRegistrar>>,
    pub slash_commands: Option<Arc<dyn CommandRegistrar>>,
}

impl Host {
    pub fn conversation(&self) -> SharedConversation {
        self.chat.conversation()
    }

    pub fn chat_id(&self) -> String {
        self.chat.conversation().read().chat_id.clone()
    }

    pub fn message_count(&self) -> usize {
        self.chat.conversation().read().messages.len()
    }

    /// Runs a host command, logging it in slash syntax.
    pub async fn run(&self, command: HostCommand) -> Result<String, HostError> {
        log::debug!("[host] {}", command);
        self.commands.execute(command).await
    }

    pub fn notify(&self, level: NoticeLevel, message: impl AsRef<str>) {
        let message = message.as_ref();
        match level {
            NoticeLevel::Info => log::info!("{}", message),
            NoticeLevel::Warning => log::warn!("{}", message),
            NoticeLevel::Error => log::error!("{}", message),
        }
        self.interaction.notify(level, message);
    }
}
