//! # LLM Delta Source
//!
//! The model itself is an external collaborator. This module only describes
//! what the engine receives from it: a stream of [`ResponseDelta`] values where
//! reasoning arrives as increments and answer text plus tool calls arrive as
//! full snapshots.

pub mod errors;
pub mod types;

pub use errors::{LLMError, LLMResult};
pub use types::{ResponseDelta, ResponseDeltaStream};
