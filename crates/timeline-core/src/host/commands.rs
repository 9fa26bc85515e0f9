use std::fmt;

use async_trait::async_trait;

use crate::error::HostError;

/// Host commands, rendered in the host's compact slash syntax by `Display`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    /// Append a user message without triggering generation.
    Send { text: String },
    /// Hide messages `start..=end` from prompts.
    Hide { start: usize, end: usize },
    Unhide { start: usize, end: usize },
    /// Delete messages `start..=end`.
    Cut { start: usize, end: usize },
    /// Start a generation.
    Trigger,
    /// Select a connection profile by name; `None` deselects.
    Profile { name: Option<String> },
    Comment { text: String },
}

pub const NO_PROFILE: &str = "<None>";

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCommand::Send { text } => write!(f, "/send {}", text),
            HostCommand::Hide { start, end } => write!(f, "/hide {}-{}", start, end),
            HostCommand::Unhide { start, end } => write!(f, "/unhide {}-{}", start, end),
            HostCommand::Cut { start, end } => write!(f, "/cut {}-{}", start, end),
            HostCommand::Trigger => f.write_str("/trigger"),
            HostCommand::Profile { name } => {
                write!(f, "/profile {}", name.as_deref().unwrap_or(NO_PROFILE))
            }
            HostCommand::Comment { text } => write!(f, "/comment {}", text),
        }
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: HostCommand) -> Result<String, HostError>;
}
