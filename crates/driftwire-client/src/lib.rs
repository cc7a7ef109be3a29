//! Real-time synchronization client for the Driftwire push protocol.
//!
//! The client keeps a local cache of user records synchronized with a server
//! over a push channel, maintains derived aggregate stats incrementally, and
//! supports optimistic suspend mutations with rollback.
//!
//! Protocol logic is sans-IO: [`SyncClient::handle`] consumes [`SyncEvent`]s
//! and returns [`SyncAction`]s for a driver to execute. The `transport`
//! feature provides the production driver (WebSocket push channel, HTTP
//! mutation endpoint, tokio timers); tests drive the client directly with a
//! virtual clock.
//!
//! # Example
//!
//! ```
//! use driftwire_client::{SyncClient, SyncEvent};
//! use driftwire_core::env::test_utils::MockEnv;
//!
//! let mut client = SyncClient::new(MockEnv::new(), "wss://example.test/ws");
//! let actions = client.handle(SyncEvent::Connect { token: "tok".to_string() });
//! assert!(!actions.is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod client;
pub mod event;
pub mod mutation;
pub mod store;
pub mod subscribe;

#[cfg(feature = "transport")]
pub mod transport;

pub use client::SyncClient;
pub use event::{MutationOutcome, SyncAction, SyncEvent};
pub use mutation::{MutationTracker, PendingMutation, PendingState, MUTATION_TIMEOUT};
pub use store::{MergeOutcome, StateStore, SuspendSnapshot};
pub use subscribe::{StateSnapshot, SubscriberId, SubscriberSet};
