//! ovproxy-core: pure types and small state machines shared by the overview
//! proxy connection manager and its runtime.
//!
//! Nothing in this crate performs IO or depends on an async runtime.

pub mod backoff;
pub mod caller_guard;
pub mod gesture;
pub mod listener;
pub mod types;

pub use types::{CoreError, InteractionFlags, UserId};
