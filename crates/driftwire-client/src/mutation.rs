//! Optimistic mutation tracking.
//!
//! A suspend mutation is applied to the cache immediately, then confirmed or
//! rolled back when the authoritative endpoint responds. While one is in
//! flight, [`MutationTracker::suppresses`] shields the cache from stale
//! echoes: real-time events that would write the pre-mutation value back
//! over the optimistic one.

use std::{collections::HashMap, ops::Sub, time::Duration};

use driftwire_core::SyncError;
use driftwire_proto::{Event, UserId, UserStatus};

use crate::store::SuspendSnapshot;

/// Window after which an unresolved mutation unconditionally rolls back.
pub const MUTATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of one optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Applied locally, awaiting the endpoint.
    Pending,
    /// Endpoint accepted; authoritative record installed.
    Confirmed,
    /// Endpoint rejected; snapshot restored.
    Failed,
    /// No response within the window; snapshot restored.
    Expired,
}

/// One in-flight optimistic mutation.
///
/// # Invariants
///
/// - At most one per target id at a time. A second request for the same
///   target must wait for resolution.
#[derive(Debug, Clone)]
pub struct PendingMutation<I> {
    /// Target record.
    pub target: UserId,
    /// Field-level snapshot taken before the optimistic apply.
    pub snapshot: SuspendSnapshot,
    /// When the mutation was issued.
    pub issued_at: I,
    /// Current lifecycle state.
    pub state: PendingState,
}

/// Registry of in-flight optimistic mutations.
#[derive(Debug, Clone)]
pub struct MutationTracker<I> {
    pending: HashMap<UserId, PendingMutation<I>>,
    timeout: Duration,
}

impl<I> MutationTracker<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create a tracker with the given expiry window.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { pending: HashMap::new(), timeout }
    }

    /// Whether a mutation is in flight for `id`.
    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of in-flight mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no mutations are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Register a new in-flight mutation.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidState`] if one is already pending for this
    ///   target; the caller must wait for it to resolve.
    pub fn register(
        &mut self,
        target: UserId,
        snapshot: SuspendSnapshot,
        now: I,
    ) -> Result<(), SyncError> {
        if self.pending.contains_key(&target) {
            return Err(SyncError::InvalidState {
                state: format!("mutation pending for {target}"),
                operation: "apply_suspend".to_string(),
            });
        }

        self.pending.insert(
            target.clone(),
            PendingMutation { target, snapshot, issued_at: now, state: PendingState::Pending },
        );

        Ok(())
    }

    /// Resolve and remove the pending mutation for `id`, if any.
    pub fn resolve(&mut self, id: &str, state: PendingState) -> Option<PendingMutation<I>> {
        let mut mutation = self.pending.remove(id)?;
        mutation.state = state;
        Some(mutation)
    }

    /// Remove and return every mutation past the expiry window.
    pub fn expire(&mut self, now: I) -> Vec<PendingMutation<I>> {
        let expired_ids: Vec<UserId> = self
            .pending
            .iter()
            .filter(|(_, m)| now - m.issued_at > self.timeout)
            .map(|(id, _)| id.clone())
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| self.resolve(&id, PendingState::Expired))
            .collect()
    }

    /// Whether an incoming event is a stale echo of pre-mutation state.
    ///
    /// While a mutation is pending for a record, an event that would set a
    /// guarded field back to its snapshot value is a server echo of state
    /// predating the in-flight mutation and must not clobber the optimistic
    /// edit. Events for other records, and events touching unguarded fields
    /// (message counts), are never suppressed.
    #[must_use]
    pub fn suppresses(&self, event: &Event) -> bool {
        match event {
            Event::UserSuspended { id, suspended, .. } => {
                self.pending.get(id.as_str()).is_some_and(|m| {
                    let echoed =
                        if *suspended { UserStatus::Suspended } else { UserStatus::Active };
                    echoed == m.snapshot.status
                })
            },
            Event::UserStatusChanged { id, online, .. } => self
                .pending
                .get(id.as_str())
                .is_some_and(|m| *online == m.snapshot.online),
            Event::UserCreated(_)
            | Event::MessageCountIncremented { .. }
            | Event::Unknown { .. } => false,
        }
    }
}

impl<I> Default for MutationTracker<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new(MUTATION_TIMEOUT)
    }
}
