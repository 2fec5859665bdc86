//! CDP Layer
//!
//! The command/event seam between the driver and the inspected target:
//! - `CommandChannel` trait and the event fan-out behind `once`/`on`
//! - In-memory channel for harnesses and tests
//! - Typed session helpers for the commands the driver issues
//! - Hand-written protocol types

pub mod channel;
pub mod memory;
pub mod session;
pub mod types;

pub use channel::{CommandChannel, EventHub, EventOnce, EventStream};
pub use memory::{DeferredReply, MemoryChannel};
pub use session::Session;
pub use types::*;
