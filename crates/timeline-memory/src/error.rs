use thiserror::Error;
use timeline_engine::{QueryError, TimelineError};
use timeline_session::SessionError;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("unknown command /{0}")]
    Unknown(String),

    #[error("/{command}: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("/{command}: invalid {argument} `{value}`")]
    InvalidArgument {
        command: &'static str,
        argument: &'static str,
        value: String,
    },

    #[error("the transcript is empty")]
    EmptyTranscript,

    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CommandError>;
