#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.

//! Streaming synchronization engine for a chat bot.
//!
//! Rebuilds conversation history from an append-only event log and streams
//! model output back into the room as size-bounded, edit-in-place events.

pub mod errors;
pub mod services;
pub mod tracer;
pub mod transport;


pub use errors::{EngineError, EngineResult, TransportError};
pub use transport::{ChatTransport, MemoryTransport, SentEvent};
