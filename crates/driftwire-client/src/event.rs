//! Client events and actions.

use std::time::Duration;

use driftwire_core::SyncError;
use driftwire_proto::{UserId, UserRecord};

/// Events the driver feeds into the client.
///
/// The driver is responsible for:
/// - Receiving text frames from the push channel
/// - Reporting transport lifecycle outcomes (opened, failed, timer expiry)
/// - Driving time forward via ticks
/// - Forwarding application intents (connect, suspend, ...)
///
/// Generic over `I` (instant type) to support both production
/// (`std::time::Instant`) and simulation environments.
#[derive(Debug, Clone)]
pub enum SyncEvent<I = std::time::Instant> {
    /// Application wants to connect with this bearer token.
    Connect {
        /// Token re-presented on every (re)connection.
        token: String,
    },

    /// Application wants to tear the connection down.
    Disconnect,

    /// The transport opened for this epoch.
    TransportOpened {
        /// Epoch the transport was opened under.
        epoch: u64,
    },

    /// The transport failed or dropped for this epoch.
    TransportFailed {
        /// Epoch the transport was opened under.
        epoch: u64,
    },

    /// The server rejected the auth token while opening this epoch's
    /// transport. Fatal; never retried.
    AuthRejected {
        /// Epoch the transport was opened under.
        epoch: u64,
        /// Server-reported rejection, e.g. the HTTP status line.
        reason: String,
    },

    /// A previously scheduled reconnect timer expired.
    ReconnectTimerFired {
        /// Epoch the timer was armed under.
        epoch: u64,
    },

    /// One text frame arrived on the push channel.
    FrameReceived {
        /// Epoch of the transport that received the frame.
        epoch: u64,
        /// Raw frame text (JSON envelope).
        text: String,
    },

    /// Initial page-load records from the REST collaborator.
    Seed {
        /// Records to install; already-cached ids are left untouched.
        records: Vec<UserRecord>,
    },

    /// Application wants to suspend or reinstate a user optimistically.
    ApplySuspend {
        /// Target record.
        id: UserId,
        /// `true` to suspend, `false` to reinstate.
        suspended: bool,
        /// Optional human-readable reason forwarded to the endpoint.
        reason: Option<String>,
    },

    /// The mutation endpoint responded for this target.
    MutationResolved {
        /// Target of the in-flight mutation.
        id: UserId,
        /// What the endpoint said.
        outcome: MutationOutcome,
    },

    /// Time tick for timeout processing.
    ///
    /// The driver should send ticks periodically so pending mutations can
    /// expire.
    Tick {
        /// Current time from the environment.
        now: I,
    },
}

/// Outcome of one authoritative mutation request.
#[derive(Debug, Clone)]
pub enum MutationOutcome {
    /// The endpoint accepted the mutation and returned the authoritative
    /// record.
    Confirmed {
        /// Server-returned record that overwrites the cached one.
        record: UserRecord,
    },

    /// The endpoint rejected the mutation or the request failed.
    Failed {
        /// Server-reported or transport-level reason.
        reason: String,
    },
}

/// Actions the client produces for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Open the push transport; report the outcome tagged with this epoch.
    OpenTransport {
        /// Full URL including the token query parameter.
        url: String,
        /// Epoch the new transport belongs to.
        epoch: u64,
    },

    /// Close the current push transport, if any.
    CloseTransport,

    /// Arm a reconnect timer; report expiry tagged with this epoch.
    ScheduleReconnect {
        /// Delay before the next attempt.
        delay: Duration,
        /// Epoch the timer belongs to.
        epoch: u64,
    },

    /// Issue `PUT /resource/{id}/suspend` against the mutation endpoint and
    /// feed the outcome back as [`SyncEvent::MutationResolved`].
    IssueSuspend {
        /// Target record.
        id: UserId,
        /// Desired suspension state.
        suspended: bool,
        /// Optional reason forwarded in the request body.
        reason: Option<String>,
    },

    /// A mutation resolved against the caller: rolled back and surfaced.
    MutationFailed {
        /// Target of the failed mutation.
        id: UserId,
        /// Why it failed. Rollback has already been applied.
        error: SyncError,
    },

    /// Fatal error; the session is over until the caller reconnects.
    Fatal(SyncError),

    /// Diagnostic message for simulation drivers.
    Log {
        /// Log message.
        message: String,
    },
}
