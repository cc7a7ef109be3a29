//! Connection lifecycle state machine.
//!
//! Owns the transport lifecycle: connect, disconnect, failure detection, and
//! reconnection with bounded linear backoff. Uses the action pattern:
//! methods mutate the state machine and return actions for the driver to
//! execute (open a socket, schedule a timer, surface a fatal error). No I/O
//! happens here.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ connect  ┌────────────┐  opened   ┌───────────┐
//! │ Disconnected │─────────>│ Connecting │──────────>│ Connected │
//! └──────────────┘          └────────────┘           └───────────┘
//!        ^                        ^  │ failed              │ failed
//!        │ attempts exhausted     │  ↓                     ↓
//!        │                  ┌──────────────┐ timer   ┌──────────────┐
//!        └──────────────────│ Reconnecting │<────────│ Reconnecting │
//!                           └──────────────┘         └──────────────┘
//! ```
//!
//! # Epochs
//!
//! Every transition that replaces the transport (`connect`, `disconnect`,
//! each reconnect attempt) increments the connection epoch. Asynchronous
//! callbacks — transport opened/failed, timer fired, frame received — carry
//! the epoch they were issued under; callbacks from a superseded epoch are
//! inert no-ops. Combined with a single serialized execution context this
//! replaces explicit cancellation: a stale timer cannot resurrect a
//! connection the user already closed.

use std::{fmt, time::Duration};

use crate::error::SyncError;

/// First backoff delay; subsequent attempts grow linearly from this base.
pub const BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Ceiling on any single backoff delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Reconnect attempts allowed before giving up (fatal connectivity).
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport; also the terminal state after exhausted reconnects.
    Disconnected,
    /// Transport open requested, not yet established.
    Connecting,
    /// Transport established and receiving frames.
    Connected,
    /// Transport lost; a reconnect timer is pending.
    Reconnecting {
        /// Which attempt this is (1-based).
        attempt: u32,
        /// Delay before the attempt fires.
        delay: Duration,
    },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt, .. } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

/// Actions returned by the connection state machine.
///
/// The driver (test harness or production transport) executes these:
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open the transport at `url`; report the outcome with this epoch.
    OpenTransport {
        /// Full connection URL including the bearer token query parameter.
        url: String,
        /// Epoch the new transport belongs to.
        epoch: u64,
    },

    /// Close the current transport, if any.
    CloseTransport,

    /// Arm a reconnect timer; report expiry with this epoch.
    ScheduleReconnect {
        /// How long to wait before the next attempt.
        delay: Duration,
        /// Epoch the timer belongs to.
        epoch: u64,
    },

    /// Surface a fatal error to the caller. The session is over.
    Fatal(SyncError),

    /// Diagnostic message for simulation drivers.
    Log {
        /// Log message.
        message: String,
    },
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Push channel URL without the token query parameter.
    pub push_url: String,
    /// First backoff delay.
    pub backoff_base: Duration,
    /// Backoff delay ceiling.
    pub backoff_cap: Duration,
    /// Attempts allowed before the connection goes terminally down.
    pub max_attempts: u32,
}

impl ConnectionConfig {
    /// Config with default backoff policy for the given push URL.
    pub fn new(push_url: impl Into<String>) -> Self {
        Self {
            push_url: push_url.into(),
            backoff_base: BACKOFF_BASE,
            backoff_cap: BACKOFF_CAP,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Backoff delay for a 1-based attempt number: `min(attempt × base, cap)`.
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    base.saturating_mul(attempt).min(cap)
}

/// Connection lifecycle state machine.
///
/// Pure state machine; time never enters it directly (delays are data in the
/// actions it emits). All transitions must run on one serialized execution
/// context — that, plus epoch tagging, is what makes cancellation of stale
/// callbacks sufficient without locks.
#[derive(Debug, Clone)]
pub struct Connection {
    state: ConnectionState,
    config: ConnectionConfig,
    /// Incremented whenever the transport is replaced or torn down.
    epoch: u64,
    /// Consecutive failed attempts since the last successful open.
    attempt: u32,
    /// Token re-presented on reconnects. `None` until the first `connect`.
    token: Option<String>,
}

impl Connection {
    /// Create a disconnected connection.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self { state: ConnectionState::Disconnected, config, epoch: 0, attempt: 0, token: None }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current epoch. Callbacks tagged with an older epoch are stale.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Consecutive failed attempts since the last successful open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether a callback tagged with `epoch` is from a superseded
    /// connection.
    #[must_use]
    pub fn is_stale(&self, epoch: u64) -> bool {
        epoch != self.epoch
    }

    /// Begin connecting with the given bearer token.
    ///
    /// No-op when already `Connected` or `Connecting`. A missing token is a
    /// fatal auth error: there is nothing to retry with.
    pub fn connect(&mut self, token: &str) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => vec![],
            ConnectionState::Disconnected | ConnectionState::Reconnecting { .. } => {
                if token.is_empty() {
                    self.state = ConnectionState::Disconnected;
                    return vec![ConnectionAction::Fatal(SyncError::Auth {
                        reason: "no auth token available".to_string(),
                    })];
                }

                self.token = Some(token.to_string());
                self.attempt = 0;
                self.open_transport()
            },
        }
    }

    /// Tear down the connection and cancel any pending reconnect.
    ///
    /// Bumping the epoch is the cancellation: a timer or late frame from the
    /// old epoch becomes inert.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Disconnected {
            return vec![];
        }

        self.epoch += 1;
        self.state = ConnectionState::Disconnected;
        self.attempt = 0;

        vec![ConnectionAction::CloseTransport]
    }

    /// The transport for `epoch` was established.
    ///
    /// Resets the attempt counter: a successful open always starts the
    /// backoff schedule over.
    pub fn transport_opened(&mut self, epoch: u64) -> Vec<ConnectionAction> {
        if self.is_stale(epoch) || self.state != ConnectionState::Connecting {
            return vec![];
        }

        self.state = ConnectionState::Connected;
        self.attempt = 0;

        vec![ConnectionAction::Log { message: format!("connected (epoch {epoch})") }]
    }

    /// The transport for `epoch` failed (socket drop, failed open).
    ///
    /// Schedules the next attempt with `min(attempt × base, cap)` delay, or
    /// goes terminally `Disconnected` once the attempt ceiling is exceeded.
    pub fn transport_failed(&mut self, epoch: u64) -> Vec<ConnectionAction> {
        if self.is_stale(epoch) || self.state == ConnectionState::Disconnected {
            return vec![];
        }

        self.attempt += 1;

        if self.attempt > self.config.max_attempts {
            self.state = ConnectionState::Disconnected;
            return vec![ConnectionAction::Fatal(SyncError::ReconnectExhausted {
                attempts: self.attempt,
            })];
        }

        let delay =
            backoff_delay(self.attempt, self.config.backoff_base, self.config.backoff_cap);
        self.state = ConnectionState::Reconnecting { attempt: self.attempt, delay };

        vec![
            ConnectionAction::Log {
                message: format!(
                    "transport failed, reconnect attempt {} in {:?}",
                    self.attempt, delay
                ),
            },
            ConnectionAction::ScheduleReconnect { delay, epoch: self.epoch },
        ]
    }

    /// The server rejected the auth token while opening the transport for
    /// `epoch`.
    ///
    /// Fatal: retrying with the same token cannot succeed, so no reconnect
    /// is scheduled and any pending backoff schedule is abandoned.
    pub fn auth_rejected(&mut self, epoch: u64, reason: &str) -> Vec<ConnectionAction> {
        if self.is_stale(epoch) || self.state == ConnectionState::Disconnected {
            return vec![];
        }

        self.state = ConnectionState::Disconnected;
        self.attempt = 0;

        vec![ConnectionAction::Fatal(SyncError::Auth { reason: reason.to_string() })]
    }

    /// The reconnect timer for `epoch` fired.
    ///
    /// Behaves as a fresh connection attempt with the stored token,
    /// preserving the attempt counter so backoff keeps growing across
    /// consecutive failures.
    pub fn reconnect_timer_fired(&mut self, epoch: u64) -> Vec<ConnectionAction> {
        if self.is_stale(epoch) {
            return vec![];
        }

        let ConnectionState::Reconnecting { .. } = self.state else {
            return vec![];
        };

        if self.token.is_none() {
            self.state = ConnectionState::Disconnected;
            return vec![ConnectionAction::Fatal(SyncError::Auth {
                reason: "no auth token available for reconnect".to_string(),
            })];
        }

        self.open_transport()
    }

    /// Bump the epoch, move to `Connecting`, and emit the open action.
    fn open_transport(&mut self) -> Vec<ConnectionAction> {
        // Every physical transport gets its own epoch so frames from a dead
        // socket can never be attributed to its replacement.
        self.epoch += 1;
        self.state = ConnectionState::Connecting;

        let token = self.token.as_deref().unwrap_or_default();
        let url = format!("{}?token={token}", self.config.push_url);

        vec![ConnectionAction::OpenTransport { url, epoch: self.epoch }]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn connection() -> Connection {
        Connection::new(ConnectionConfig::new("wss://example.test/ws"))
    }

    fn open_epoch(actions: &[ConnectionAction]) -> u64 {
        actions
            .iter()
            .find_map(|a| match a {
                ConnectionAction::OpenTransport { epoch, .. } => Some(*epoch),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn connect_lifecycle() {
        let mut conn = connection();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let actions = conn.connect("tok-1");
        assert_eq!(conn.state(), ConnectionState::Connecting);
        let epoch = open_epoch(&actions);
        assert!(matches!(
            &actions[0],
            ConnectionAction::OpenTransport { url, .. } if url == "wss://example.test/ws?token=tok-1"
        ));

        conn.transport_opened(epoch);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.attempt(), 0);
    }

    #[test]
    fn connect_is_noop_when_connected_or_connecting() {
        let mut conn = connection();
        let epoch = open_epoch(&conn.connect("tok"));

        assert!(conn.connect("tok").is_empty());

        conn.transport_opened(epoch);
        assert!(conn.connect("tok").is_empty());
        assert_eq!(conn.epoch(), epoch);
    }

    #[test]
    fn missing_token_is_fatal_auth() {
        let mut conn = connection();
        let actions = conn.connect("");

        assert!(matches!(&actions[0], ConnectionAction::Fatal(SyncError::Auth { .. })));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn backoff_delays_grow_linearly_to_cap() {
        let expected = [2u64, 4, 6, 8, 10];
        for (i, secs) in expected.iter().enumerate() {
            let attempt = u32::try_from(i).unwrap() + 1;
            assert_eq!(
                backoff_delay(attempt, BACKOFF_BASE, BACKOFF_CAP),
                Duration::from_secs(*secs),
            );
        }

        // Past the cap the delay stays flat.
        assert_eq!(backoff_delay(17, BACKOFF_BASE, BACKOFF_CAP), BACKOFF_CAP);
    }

    #[test]
    fn failure_schedules_reconnect_with_backoff() {
        let mut conn = connection();
        let epoch = open_epoch(&conn.connect("tok"));
        conn.transport_opened(epoch);

        let actions = conn.transport_failed(epoch);
        assert_eq!(conn.state(), ConnectionState::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(2),
        });
        assert!(actions.iter().any(|a| matches!(
            a,
            ConnectionAction::ScheduleReconnect { delay, epoch: e }
                if *delay == Duration::from_secs(2) && *e == epoch
        )));
    }

    #[test]
    fn attempt_counter_resets_on_every_connected_transition() {
        let mut conn = connection();
        let mut epoch = open_epoch(&conn.connect("tok"));

        // Fail twice, then succeed.
        conn.transport_failed(epoch);
        epoch = open_epoch(&conn.reconnect_timer_fired(epoch));
        conn.transport_failed(epoch);
        assert_eq!(conn.attempt(), 2);

        epoch = open_epoch(&conn.reconnect_timer_fired(epoch));
        conn.transport_opened(epoch);
        assert_eq!(conn.attempt(), 0);
    }

    #[test]
    fn reconnects_exhaust_after_the_ceiling() {
        let mut conn = connection();
        let mut epoch = open_epoch(&conn.connect("tok"));

        for expected_attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            let actions = conn.transport_failed(epoch);
            assert_eq!(conn.attempt(), expected_attempt);
            assert!(
                actions
                    .iter()
                    .any(|a| matches!(a, ConnectionAction::ScheduleReconnect { .. })),
            );
            epoch = open_epoch(&conn.reconnect_timer_fired(epoch));
        }

        // Sixth failure: terminal.
        let actions = conn.transport_failed(epoch);
        assert!(matches!(
            &actions[0],
            ConnectionAction::Fatal(SyncError::ReconnectExhausted { attempts: 6 })
        ));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        // Stale timer from the dead epoch is inert.
        assert!(conn.reconnect_timer_fired(epoch).is_empty());
    }

    #[test]
    fn auth_rejection_is_terminal_without_retry() {
        let mut conn = connection();
        let epoch = open_epoch(&conn.connect("tok"));

        let actions = conn.auth_rejected(epoch, "401 Unauthorized");
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], ConnectionAction::Fatal(SyncError::Auth { .. })));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        // Terminal: no backoff schedule survives the rejection.
        assert!(conn.transport_failed(epoch).is_empty());
        assert!(conn.reconnect_timer_fired(epoch).is_empty());
    }

    #[test]
    fn stale_auth_rejection_is_inert() {
        let mut conn = connection();
        let first = open_epoch(&conn.connect("tok"));
        conn.disconnect();
        let _second = open_epoch(&conn.connect("tok"));

        assert!(conn.auth_rejected(first, "401 Unauthorized").is_empty());
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn disconnect_invalidates_pending_reconnect() {
        let mut conn = connection();
        let epoch = open_epoch(&conn.connect("tok"));
        conn.transport_failed(epoch);
        assert!(matches!(conn.state(), ConnectionState::Reconnecting { .. }));

        let actions = conn.disconnect();
        assert_eq!(actions, vec![ConnectionAction::CloseTransport]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        // The timer armed before disconnect fires with the old epoch.
        assert!(conn.reconnect_timer_fired(epoch).is_empty());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn stale_epoch_callbacks_are_inert() {
        let mut conn = connection();
        let first = open_epoch(&conn.connect("tok"));
        conn.transport_opened(first);

        // Replace the transport.
        conn.disconnect();
        let second = open_epoch(&conn.connect("tok"));

        assert!(conn.transport_failed(first).is_empty());
        assert!(conn.transport_opened(first).is_empty());
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_ne!(first, second);
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_capped(earlier in 1u32..10_000, later in 1u32..10_000) {
            let (lo, hi) = (earlier.min(later), earlier.max(later));
            let d_lo = backoff_delay(lo, BACKOFF_BASE, BACKOFF_CAP);
            let d_hi = backoff_delay(hi, BACKOFF_BASE, BACKOFF_CAP);

            prop_assert!(d_lo <= d_hi);
            prop_assert!(d_hi <= BACKOFF_CAP);
            prop_assert!(d_lo >= BACKOFF_BASE);
        }
    }

    #[test]
    fn reconnect_represents_the_stored_token() {
        let mut conn = connection();
        let epoch = open_epoch(&conn.connect("tok-9"));
        conn.transport_failed(epoch);

        let actions = conn.reconnect_timer_fired(epoch);
        assert!(matches!(
            &actions[0],
            ConnectionAction::OpenTransport { url, .. } if url.ends_with("?token=tok-9")
        ));
    }
}
