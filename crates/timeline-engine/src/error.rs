use thiserror::Error;
use timeline_core::{HostError, StoreError};
use timeline_llm::GeneratorError;

#[derive(Error, Debug)]
pub enum TimelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error("chapter must end after message {last_end}, got {end_msg_id}")]
    OutOfOrder { end_msg_id: usize, last_end: usize },

    #[error("chapter must start at message {expected}, got {start_msg_id}")]
    Discontiguous { start_msg_id: usize, expected: usize },

    #[error("message {index} is out of bounds (transcript has {len} messages)")]
    OutOfBounds { index: usize, len: usize },

    #[error("chapter {0} not found")]
    ChapterNotFound(usize),

    #[error("no chapter ends at message {0}")]
    NoChapterAt(usize),

    #[error("nothing to summarize between messages {start} and {end}")]
    EmptyRange { start: usize, end: usize },

    #[error("the summarizer returned an empty summary")]
    EmptySummary,

    #[error("{operation} cancelled: {reason}")]
    Cancelled { operation: String, reason: String },

    #[error("profile unresolved: {0}")]
    ProfileUnresolved(String),

    #[error("model reply is not a JSON array: {0}")]
    InvalidPlan(String),
}

impl TimelineError {
    pub fn from_generator(err: GeneratorError) -> Self {
        match err {
            GeneratorError::Unavailable(reason) => TimelineError::ProfileUnresolved(reason),
            other => TimelineError::Generator(other),
        }
    }
}

/// Query failures. `Display` is the text handed back to callers that expect a
/// string, including models calling query tools.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Chapter {0} not found")]
    ChapterNotFound(usize),

    #[error("Invalid chapter range {start}-{end}")]
    InvalidRange { start: usize, end: usize },

    #[error("Cannot query more than {limit} chapters at once (requested {requested})")]
    TooManyChapters { limit: usize, requested: usize },

    #[error("No query profile available: {0}")]
    ProfileUnresolved(String),

    #[error("Query failed: {0}")]
    Generator(#[source] GeneratorError),

    #[error("Timeline unavailable: {0}")]
    Timeline(#[from] TimelineError),
}

impl From<GeneratorError> for QueryError {
    fn from(err: GeneratorError) -> Self {
        match err {
            GeneratorError::Unavailable(reason) => QueryError::ProfileUnresolved(reason),
            other => QueryError::Generator(other),
        }
    }
}
