//! The synchronization client: one state machine tying together the
//! connection lifecycle, the frame pipeline, the merge engine, optimistic
//! mutations, and subscriber dispatch.
//!
//! Uses the action pattern: [`SyncClient::handle`] consumes one event,
//! mutates internal state, and returns actions for the driver to execute.
//! No I/O happens here, which is what makes the whole client testable with
//! a virtual clock and hand-built frames.

use tracing::{debug, warn};

use driftwire_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionState, Environment, SyncError,
};
use driftwire_proto::{DashboardStats, Envelope, Event, UserFilter, UserRecord, UserSort};

use crate::{
    event::{MutationOutcome, SyncAction, SyncEvent},
    mutation::{MutationTracker, PendingState, MUTATION_TIMEOUT},
    store::{MergeOutcome, StateStore},
    subscribe::{StateSnapshot, SubscriberId, SubscriberSet},
};

/// Real-time synchronization client.
///
/// All methods must run on one serialized execution context; epoch tagging
/// (not locking) is what keeps stale transport callbacks inert. The driver
/// owns the client, feeds it [`SyncEvent`]s, and executes the returned
/// [`SyncAction`]s.
pub struct SyncClient<E: Environment> {
    env: E,
    connection: Connection,
    store: StateStore,
    mutations: MutationTracker<E::Instant>,
    subscribers: SubscriberSet,
}

impl<E: Environment> SyncClient<E> {
    /// Create a client for the given push URL.
    #[must_use]
    pub fn new(env: E, push_url: impl Into<String>) -> Self {
        Self::with_config(env, ConnectionConfig::new(push_url))
    }

    /// Create a client with an explicit connection config.
    #[must_use]
    pub fn with_config(env: E, config: ConnectionConfig) -> Self {
        Self {
            env,
            connection: Connection::new(config),
            store: StateStore::new(),
            mutations: MutationTracker::new(MUTATION_TIMEOUT),
            subscribers: SubscriberSet::new(),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Current connection epoch, for tagging driver callbacks.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.connection.epoch()
    }

    /// Cached record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&UserRecord> {
        self.store.get(id)
    }

    /// Filtered, sorted view of the cache. Computed at read time.
    #[must_use]
    pub fn query(&self, filter: UserFilter, sort: UserSort) -> Vec<UserRecord> {
        self.store.query(filter, sort)
    }

    /// Current aggregate counters.
    #[must_use]
    pub fn stats(&self) -> DashboardStats {
        self.store.stats()
    }

    /// Whether a mutation is in flight for `id`.
    #[must_use]
    pub fn is_mutation_pending(&self, id: &str) -> bool {
        self.mutations.is_pending(id)
    }

    /// Register a state-change callback.
    ///
    /// The callback is invoked immediately with the current snapshot, then
    /// synchronously inside [`SyncClient::handle`] after every event that
    /// changed the cache or the connection state. Callbacks must not call
    /// back into the client.
    pub fn subscribe<F>(&mut self, mut callback: F) -> SubscriberId
    where
        F: FnMut(&StateSnapshot) + Send + 'static,
    {
        callback(&self.snapshot());
        self.subscribers.subscribe(callback)
    }

    /// Remove a state-change callback. Unknown handles are a no-op.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Process one event and return the actions the driver must execute.
    pub fn handle(&mut self, event: SyncEvent<E::Instant>) -> Vec<SyncAction> {
        match event {
            SyncEvent::Connect { token } => self.on_connection(|c| c.connect(&token)),
            SyncEvent::Disconnect => self.on_connection(Connection::disconnect),
            SyncEvent::TransportOpened { epoch } => {
                self.on_connection(|c| c.transport_opened(epoch))
            },
            SyncEvent::TransportFailed { epoch } => {
                self.on_connection(|c| c.transport_failed(epoch))
            },
            SyncEvent::AuthRejected { epoch, reason } => {
                self.on_connection(|c| c.auth_rejected(epoch, &reason))
            },
            SyncEvent::ReconnectTimerFired { epoch } => {
                self.on_connection(|c| c.reconnect_timer_fired(epoch))
            },
            SyncEvent::FrameReceived { epoch, text } => self.on_frame(epoch, &text),
            SyncEvent::Seed { records } => self.on_seed(records),
            SyncEvent::ApplySuspend { id, suspended, reason } => {
                self.on_apply_suspend(id, suspended, reason)
            },
            SyncEvent::MutationResolved { id, outcome } => self.on_mutation_resolved(&id, outcome),
            SyncEvent::Tick { now } => self.on_tick(now),
        }
    }

    /// Run a connection transition and lift its actions, notifying
    /// subscribers when the connection state actually changed.
    fn on_connection<F>(&mut self, transition: F) -> Vec<SyncAction>
    where
        F: FnOnce(&mut Connection) -> Vec<ConnectionAction>,
    {
        let before = self.connection.state();
        let actions = transition(&mut self.connection);

        if self.connection.state() != before {
            self.notify();
        }

        actions.into_iter().map(lift).collect()
    }

    /// One text frame: parse, guard, decode, suppress, merge, notify.
    fn on_frame(&mut self, epoch: u64, text: &str) -> Vec<SyncAction> {
        if self.connection.is_stale(epoch) {
            debug!(epoch, "dropping frame from superseded transport");
            return vec![];
        }

        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "discarding malformed frame");
                return vec![];
            },
        };

        // Frames with success == false report server-side errors; their
        // message names the error, not an event tag.
        if !envelope.success {
            warn!(message = %envelope.message, "server reported an error frame");
            return vec![];
        }

        let now_millis = self.env.unix_millis();
        let event = Event::decode(&envelope, now_millis);

        if let Event::Unknown { tag } = &event {
            debug!(tag = %tag, "ignoring unrecognized event");
            return vec![];
        }

        if self.mutations.suppresses(&event) {
            debug!(id = ?event.target(), "suppressing stale echo of pre-mutation state");
            return vec![];
        }

        match self.store.merge(&event, now_millis) {
            MergeOutcome::Dropped { reason } => {
                warn!(reason = %reason, "event could not be applied");
            },
            outcome if outcome.changed() => self.notify(),
            _ => {},
        }

        vec![]
    }

    fn on_seed(&mut self, records: Vec<UserRecord>) -> Vec<SyncAction> {
        let inserted = self.store.seed(records, self.env.unix_millis());
        debug!(inserted, "seeded initial records");

        if inserted > 0 {
            self.notify();
        }

        vec![]
    }

    /// Optimistic suspend: snapshot, apply locally, issue the request.
    fn on_apply_suspend(
        &mut self,
        id: String,
        suspended: bool,
        reason: Option<String>,
    ) -> Vec<SyncAction> {
        let Some(snapshot) = self.store.suspend_snapshot(&id) else {
            return vec![SyncAction::MutationFailed {
                id: id.clone(),
                error: SyncError::Mutation { reason: format!("unknown user {id}") },
            }];
        };

        if let Err(error) = self.mutations.register(id.clone(), snapshot, self.env.now()) {
            return vec![SyncAction::MutationFailed { id, error }];
        }

        // Local synthetic apply so the caller sees the change immediately.
        let event = Event::UserSuspended {
            id: id.clone(),
            suspended,
            by: "local".to_string(),
        };
        if self.store.merge(&event, self.env.unix_millis()).changed() {
            self.notify();
        }

        vec![SyncAction::IssueSuspend { id, suspended, reason }]
    }

    fn on_mutation_resolved(&mut self, id: &str, outcome: MutationOutcome) -> Vec<SyncAction> {
        match outcome {
            MutationOutcome::Confirmed { record } => {
                if self.mutations.resolve(id, PendingState::Confirmed).is_none() {
                    debug!(id, "dropping resolution for a mutation that already expired");
                    return vec![];
                }

                if self.store.overwrite(record) {
                    self.notify();
                }

                vec![]
            },
            MutationOutcome::Failed { reason } => {
                let Some(mutation) = self.mutations.resolve(id, PendingState::Failed) else {
                    debug!(id, "dropping failure for a mutation that already expired");
                    return vec![];
                };

                warn!(id, reason = %reason, "mutation rejected, rolling back");
                if self.store.restore_suspend(id, &mutation.snapshot) {
                    self.notify();
                }

                vec![SyncAction::MutationFailed {
                    id: id.to_string(),
                    error: SyncError::Mutation { reason },
                }]
            },
        }
    }

    /// Expire overdue mutations and roll their targets back.
    fn on_tick(&mut self, now: E::Instant) -> Vec<SyncAction> {
        let expired = self.mutations.expire(now);
        if expired.is_empty() {
            return vec![];
        }

        let mut actions = Vec::with_capacity(expired.len());
        let mut rolled_back = false;

        for mutation in expired {
            warn!(id = %mutation.target, "mutation timed out, rolling back");
            rolled_back |= self.store.restore_suspend(&mutation.target, &mutation.snapshot);
            actions.push(SyncAction::MutationFailed {
                id: mutation.target,
                error: SyncError::MutationTimeout { elapsed: now - mutation.issued_at },
            });
        }

        if rolled_back {
            self.notify();
        }

        actions
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            users: self.store.records().cloned().collect(),
            stats: self.store.stats(),
            connection: self.connection.state(),
        }
    }

    fn notify(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }

        let snapshot = self.snapshot();
        self.subscribers.notify(&snapshot);
    }
}

impl<E: Environment> std::fmt::Debug for SyncClient<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("connection", &self.connection.state())
            .field("records", &self.store.len())
            .field("pending_mutations", &self.mutations.len())
            .finish_non_exhaustive()
    }
}

/// Lift a connection action into the client action space.
fn lift(action: ConnectionAction) -> SyncAction {
    match action {
        ConnectionAction::OpenTransport { url, epoch } => SyncAction::OpenTransport { url, epoch },
        ConnectionAction::CloseTransport => SyncAction::CloseTransport,
        ConnectionAction::ScheduleReconnect { delay, epoch } => {
            SyncAction::ScheduleReconnect { delay, epoch }
        },
        ConnectionAction::Fatal(error) => SyncAction::Fatal(error),
        ConnectionAction::Log { message } => SyncAction::Log { message },
    }
}
