//! Error taxonomy for the synchronization client.
//!
//! Strongly-typed errors with an explicit recovery policy per kind. Two
//! classes matter to callers: fatal errors (authentication, exhausted
//! reconnection) end the session and require manual intervention; everything
//! else is either retried internally or surfaced to the single caller that
//! initiated the failing operation.
//!
//! Decode failures are deliberately NOT represented here: a malformed frame
//! is logged and dropped inside the ingestion path and never reaches a
//! caller.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the synchronization client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The transport dropped or could not be established.
    ///
    /// Retried via bounded backoff; surfaces only through the reconnecting
    /// connection state.
    #[error("transport error: {reason}")]
    Transport {
        /// Description of the underlying failure.
        reason: String,
    },

    /// Missing or rejected auth token. Fatal; no reconnection is attempted.
    #[error("auth error: {reason}")]
    Auth {
        /// Why authentication failed.
        reason: String,
    },

    /// The reconnect backoff ceiling was reached.
    ///
    /// Fatal connectivity state; the caller must trigger a fresh `connect`
    /// manually.
    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted {
        /// How many attempts were made before giving up.
        attempts: u32,
    },

    /// The mutation endpoint rejected or failed a request.
    ///
    /// The optimistic edit has already been rolled back when this surfaces.
    #[error("mutation failed: {reason}")]
    Mutation {
        /// Server-reported or transport-level failure reason.
        reason: String,
    },

    /// A mutation got no response within its timeout window.
    ///
    /// The optimistic edit has already been rolled back when this surfaces.
    #[error("mutation timed out after {elapsed:?}")]
    MutationTimeout {
        /// How long the client waited.
        elapsed: Duration,
    },

    /// An operation was attempted in a state that does not permit it.
    #[error("invalid state: cannot {operation} while {state}")]
    InvalidState {
        /// State the client was in, rendered for diagnostics.
        state: String,
        /// Operation that was attempted.
        operation: String,
    },
}

impl SyncError {
    /// Returns true if this error ends the session.
    ///
    /// Fatal errors are never retried internally: a missing token cannot be
    /// fixed by reconnecting, and an exhausted backoff means the caller must
    /// decide when to try again.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::ReconnectExhausted { .. })
    }

    /// Returns true if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::MutationTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_exhaustion_are_fatal() {
        assert!(SyncError::Auth { reason: "no token".to_string() }.is_fatal());
        assert!(SyncError::ReconnectExhausted { attempts: 6 }.is_fatal());
    }

    #[test]
    fn transport_and_timeout_are_transient() {
        assert!(SyncError::Transport { reason: "socket closed".to_string() }.is_transient());
        assert!(
            SyncError::MutationTimeout { elapsed: Duration::from_secs(10) }.is_transient()
        );

        assert!(!SyncError::Transport { reason: "socket closed".to_string() }.is_fatal());
    }

    #[test]
    fn mutation_failures_are_neither_fatal_nor_transient() {
        let err = SyncError::Mutation { reason: "forbidden".to_string() };
        assert!(!err.is_fatal());
        assert!(!err.is_transient());
    }
}
