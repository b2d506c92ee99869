//! ovproxy-daemon: the overview proxy connection manager.
//!
//! Keeps one live connection to the overview service, rebinding across user
//! switches, remote death and bind failures, and fans events out to
//! registered listeners. All state changes go through
//! [`manager::ProxyConnectionManager::handle`] on a single serialized queue.

pub mod binder;
pub mod error;
pub mod inbound;
pub mod manager;
pub mod prefs;
pub mod scheduler;

pub use ovproxy_core::types;
