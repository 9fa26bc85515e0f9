use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::HostError;
use crate::model::Conversation;

/// The live conversation. Reads and writes are synchronous; persistence goes
/// through [`ChatHost`].
pub type SharedConversation = Arc<RwLock<Conversation>>;

#[async_trait]
pub trait ChatHost: Send + Sync {
    fn conversation(&self) -> SharedConversation;

    /// Schedules a metadata save; repeated calls within the debounce window
    /// coalesce.
    fn save_metadata_debounced(&self);

    async fn save_conversation(&self) -> Result<(), HostError>;

    async fn reload_conversation(&self) -> Result<(), HostError>;

    /// Triggers the host's built-in transcript backup.
    async fn create_backup(&self) -> Result<(), HostError>;
}
