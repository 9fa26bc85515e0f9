//! Chapter-based long-term memory for chat transcripts.
//!
//! [`TimelineMemory`] is the entry point a host embeds: it registers the
//! prompt macros and slash commands, reacts to host events (clearing fill
//! results on a new user turn, migrating and recovering on conversation
//! load) and dispatches commands to the engine and session crates.

pub mod command;
pub mod error;
pub mod memory;

pub use command::{catalogue, SlashArgs, TimelineCommand};
pub use error::{CommandError, Result};
pub use memory::TimelineMemory;

pub use timeline_core as core;
pub use timeline_engine as engine;
pub use timeline_session as session;
