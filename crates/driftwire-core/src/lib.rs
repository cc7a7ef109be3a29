//! Core building blocks for the Driftwire synchronization client.
//!
//! This crate is deliberately free of wire-format and merge-engine concerns.
//! It provides:
//!
//! - [`env::Environment`]: the time abstraction that keeps protocol logic
//!   deterministic and testable without real clocks or timers.
//! - [`error::SyncError`]: the error taxonomy shared by every layer, with
//!   fatal/transient classification.
//! - [`connection::Connection`]: the sans-IO connection lifecycle state
//!   machine for connect, disconnect, failure detection, and bounded
//!   backoff, with epoch-based cancellation of stale callbacks.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod env;
pub mod error;

pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState};
pub use env::{Environment, SystemEnv};
pub use error::SyncError;
