pub mod chapter;
pub mod checkpoint;
pub mod conversation;
pub mod fill;

pub use chapter::{Chapter, MessageRange, TimelineEntry};
pub use checkpoint::{SessionCheckpoint, SessionKind};
pub use conversation::{CharacterCard, ChatMessage, Conversation, MessageExtra, ToolInvocation};
pub use fill::{FillMode, TimelineFillResult};
