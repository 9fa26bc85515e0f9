//! Request-reply access to named model profiles.
//!
//! [`Generator`] resolves a profile, sizes the completion budget, remaps
//! parameters for the profile's model family and strips reasoning preambles.
//! [`HttpProfileService`] is an OpenAI-compatible backend for running
//! outside a chat host.

pub mod error;
pub mod family;
pub mod generator;
pub mod http;
pub mod reasoning;

pub use error::GeneratorError;
pub use family::ModelFamily;
pub use generator::{GenerateOptions, Generator, Prompt};
pub use http::{HttpProfile, HttpProfileService, HttpProfilesConfig};
pub use reasoning::{strip_reasoning_blocks, strip_reasoning_preamble};
