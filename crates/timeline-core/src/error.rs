use thiserror::Error;

/// Failure reported by a host capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("request to profile `{profile}` failed: {message}")]
    Request { profile: String, message: String },

    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    #[error("swipe failed: {0}")]
    Swipe(String),

    #[error("world info error: {0}")]
    WorldInfo(String),

    #[error("save failed: {0}")]
    Save(String),

    #[error("host capability unavailable: {0}")]
    Unavailable(&'static str),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("metadata key `{key}` is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize `{key}`: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("timeline is stored in the legacy text format; run migration first")]
    LegacyTimeline,

    #[error(transparent)]
    Host(#[from] HostError),
}
