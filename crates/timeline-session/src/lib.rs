//! Tool-driven sessions that take over the conversation.
//!
//! A session hides the transcript, swaps to its own connection profile,
//! seeds a prompt and lets the model work through function tools until it
//! calls a terminator. [`SessionRuntime`] owns that lifecycle (checkpoint,
//! dead-end retries, unwinding and crash recovery); the two programs,
//! [`AgenticRetrieval`] and [`LoreManager`], only supply a profile, a seed
//! prompt and tools. [`SessionManager`] keeps one runtime per kind and
//! conversation and keeps the kinds mutually exclusive.

pub mod agentic;
pub mod args;
pub mod error;
pub mod lore;
pub mod manager;
pub mod policy;
pub mod runtime;
pub mod world;

pub use agentic::AgenticRetrieval;
pub use error::{Result, SessionError};
pub use lore::{EntryEdit, LoreManager};
pub use manager::{RecoveryReport, SessionManager};
pub use policy::{RetrySchedule, SwapSettlePolicy, MAX_RETRIES};
pub use runtime::{SessionOutcome, SessionProgram, SessionRuntime};
pub use world::BoundWorld;
