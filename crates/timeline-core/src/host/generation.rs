use async_trait::async_trait;

use crate::error::HostError;

/// Control over the host's generation pipeline.
#[async_trait]
pub trait GenerationControl: Send + Sync {
    fn is_swiping_allowed(&self) -> bool;

    /// Regenerates the last reply in place.
    async fn swipe_right(&self) -> Result<(), HostError>;

    /// Best-effort stop of an in-flight generation. Returns whether one was
    /// running.
    async fn stop_generation(&self) -> bool;
}
