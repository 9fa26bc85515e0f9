use thiserror::Error;
use timeline_core::tools::RegistryError;
use timeline_core::{HostError, SessionKind, StoreError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a {0} session is already running")]
    AlreadyActive(SessionKind),

    #[error("cannot start a {requested} session while a {active} session is running")]
    Conflict {
        requested: SessionKind,
        active: SessionKind,
    },

    #[error("the host has no tool support; {0} sessions are disabled")]
    ToolsUnavailable(SessionKind),

    #[error("{kind} session profile unresolved: {reason}")]
    ProfileUnresolved { kind: SessionKind, reason: String },

    #[error("no lorebook is bound to the current character")]
    NoWorld,

    #[error("failed to register session tool: {0}")]
    Registry(#[from] RegistryError),

    #[error("recovery of the {kind} session failed: {source}")]
    RecoveryFailed {
        kind: SessionKind,
        #[source]
        source: Box<SessionError>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
