use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Cancel,
}

/// User-facing surface: toasts and confirmation prompts.
#[async_trait]
pub trait Interaction: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);

    /// Asks whether a failed step of `operation` should be retried.
    async fn confirm_retry(&self, operation: &str, reason: &str) -> RetryDecision;
}
