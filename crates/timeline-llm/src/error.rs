use thiserror::Error;
use timeline_core::HostError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    /// No profile configured, or the configured one is not in the host's list.
    #[error("no usable connection profile: {0}")]
    Unavailable(String),

    #[error("generation with profile `{profile}` failed: {source}")]
    Request {
        profile: String,
        #[source]
        source: HostError,
    },
}

pub type Result<T> = std::result::Result<T, GeneratorError>;
