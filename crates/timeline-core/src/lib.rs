//! Shared building blocks for the timeline memory workspace.
//!
//! - [`model`]: chapters, host messages, session checkpoints and fill results
//! - [`host`]: capability traits the host application provides, plus an
//!   in-process implementation in [`host::memory`]
//! - [`tools`]: the function-tool trait and a registry the host routes calls through
//! - [`store`]: typed access to per-conversation metadata
//! - [`settings`]: extension configuration
//! - [`tokens`]: token counting

pub mod error;
pub mod host;
pub mod model;
pub mod settings;
pub mod store;
pub mod tokens;
pub mod tools;

pub use error::{HostError, StoreError};
pub use host::{
    ChatHost, CommandExecutor, EventBus, EventKind, EventWaiter, GenerationControl, Host,
    HostCommand, HostEvent, Interaction, NoticeLevel, ProfileService, PromptFormatter,
    RetryDecision, SharedConversation, WorldInfoStore,
};
pub use model::{
    Chapter, CharacterCard, ChatMessage, Conversation, FillMode, MessageExtra, SessionCheckpoint,
    SessionKind, TimelineFillResult, ToolInvocation,
};
pub use settings::{ReasoningEffort, Settings, SettingsError, SharedSettings};
pub use store::Store;
pub use tokens::{HeuristicTokenCounter, TokenCounter};
pub use tools::{FunctionTool, Tool, ToolError, ToolManager, ToolRegistry, ToolResult};
