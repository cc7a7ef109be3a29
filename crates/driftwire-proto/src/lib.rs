//! Wire types for the Driftwire push protocol.
//!
//! The server pushes JSON text frames wrapped in a fixed [`Envelope`]
//! (`{success, message, data}`). The `message` field is the event tag and
//! `data` carries tag-specific fields. [`Event::decode`] maps an envelope to
//! a closed set of typed events via an explicit tag table; unrecognized or
//! ill-typed frames degrade to [`Event::Unknown`] so server-added event
//! types never break old clients.
//!
//! Record and stat types ([`UserRecord`], [`DashboardStats`]) are shared
//! vocabulary between the wire layer and the client's merge engine.

mod envelope;
mod event;
mod record;

pub use envelope::{Envelope, EnvelopeError};
pub use event::Event;
pub use record::{
    DashboardStats, UserFilter, UserRecord, UserRole, UserSort, UserStatus,
};

/// Stable user identifier as carried on the wire.
pub type UserId = String;

/// Wall-clock timestamp in milliseconds since the Unix epoch.
pub type Timestamp = i64;
