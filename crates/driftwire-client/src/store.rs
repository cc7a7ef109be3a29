//! The merge engine: cached records plus derived aggregate stats.
//!
//! [`StateStore`] owns the record cache the rest of the application reads.
//! Events are applied in arrival order, never reordered, and each merge is
//! O(1): the aggregate counters are adjusted incrementally, never recomputed
//! by a full scan. Filtered/sorted views are computed at read time and never
//! cached.

use std::collections::HashMap;

use driftwire_proto::{
    DashboardStats, Event, Timestamp, UserFilter, UserId, UserRecord, UserSort, UserStatus,
};

/// One day in milliseconds; the window used to seed `new_users_today`.
const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// What a merge did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new record was inserted.
    Inserted,
    /// An existing record was updated.
    Applied,
    /// The event matched a record but changed nothing.
    Unchanged,
    /// The event referenced an id that is not cached yet. Logged as an
    /// anomaly by the caller, never fatal.
    Dropped {
        /// Why the event could not be applied.
        reason: String,
    },
    /// Unknown event variant; inert by design.
    Ignored,
}

impl MergeOutcome {
    /// Whether subscribers should be notified.
    #[must_use]
    pub fn changed(&self) -> bool {
        matches!(self, Self::Inserted | Self::Applied)
    }
}

/// Pre-mutation snapshot of the fields an optimistic suspend touches.
///
/// `online` is captured alongside so stale presence echoes from before the
/// mutation can be recognized, but rollback only restores the fields the
/// optimistic apply actually changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendSnapshot {
    /// Status before the optimistic apply.
    pub status: UserStatus,
    /// Suspension timestamp before the optimistic apply.
    pub suspended_at: Option<Timestamp>,
    /// Presence flag at snapshot time (echo detection only).
    pub online: bool,
}

/// The cached record collection and its derived stats.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    records: HashMap<UserId, UserRecord>,
    stats: DashboardStats,
}

impl StateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Cached record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&UserRecord> {
        self.records.get(id)
    }

    /// Current aggregate counters.
    #[must_use]
    pub fn stats(&self) -> DashboardStats {
        self.stats
    }

    /// All cached records, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &UserRecord> {
        self.records.values()
    }

    /// Pre-mutation snapshot for an optimistic suspend of `id`.
    #[must_use]
    pub fn suspend_snapshot(&self, id: &str) -> Option<SuspendSnapshot> {
        self.records.get(id).map(|r| SuspendSnapshot {
            status: r.status,
            suspended_at: r.suspended_at,
            online: r.online,
        })
    }

    /// Apply one event to the cache. Deterministic and order-sensitive.
    pub fn merge(&mut self, event: &Event, now_millis: Timestamp) -> MergeOutcome {
        match event {
            Event::UserCreated(record) => self.merge_created(record),
            Event::UserStatusChanged { id, online, last_active } => {
                self.merge_status(id, *online, *last_active)
            },
            Event::MessageCountIncremented { id, delta } => self.merge_message_count(id, *delta),
            Event::UserSuspended { id, suspended, .. } => {
                self.merge_suspended(id, *suspended, now_millis)
            },
            Event::Unknown { .. } => MergeOutcome::Ignored,
        }
    }

    fn merge_created(&mut self, record: &UserRecord) -> MergeOutcome {
        if self.records.contains_key(&record.id) {
            // Idempotent: re-delivery of new_user must not double-count.
            return MergeOutcome::Unchanged;
        }

        self.stats.total_users += 1;
        self.stats.new_users_today += 1;
        if record.online {
            self.stats.active_users += 1;
        }

        self.records.insert(record.id.clone(), record.clone());
        MergeOutcome::Inserted
    }

    fn merge_status(
        &mut self,
        id: &str,
        online: bool,
        last_active: Option<Timestamp>,
    ) -> MergeOutcome {
        let Some(record) = self.records.get_mut(id) else {
            return MergeOutcome::Dropped { reason: format!("user_status for unknown id {id}") };
        };

        let flipped = record.online != online;
        let touched_activity = last_active.is_some() && record.last_active != last_active;

        record.online = online;
        if let Some(ts) = last_active {
            record.last_active = Some(ts);
        }

        if flipped {
            if online {
                self.stats.active_users += 1;
            } else {
                self.stats.active_users = self.stats.active_users.saturating_sub(1);
            }
        }

        if flipped || touched_activity { MergeOutcome::Applied } else { MergeOutcome::Unchanged }
    }

    fn merge_message_count(&mut self, id: &str, delta: u64) -> MergeOutcome {
        let Some(record) = self.records.get_mut(id) else {
            return MergeOutcome::Dropped { reason: format!("message_sent for unknown id {id}") };
        };

        if delta == 0 {
            return MergeOutcome::Unchanged;
        }

        // The wire accepts any u64 delta; saturate rather than trusting the
        // server to stay in range (overflow checks are on in release).
        record.message_count = record.message_count.saturating_add(delta);
        self.stats.total_messages = self.stats.total_messages.saturating_add(delta);
        self.stats.messages_last_24h = self.stats.messages_last_24h.saturating_add(delta);

        MergeOutcome::Applied
    }

    fn merge_suspended(&mut self, id: &str, suspended: bool, now_millis: Timestamp) -> MergeOutcome {
        let Some(record) = self.records.get_mut(id) else {
            return MergeOutcome::Dropped { reason: format!("user_suspended for unknown id {id}") };
        };

        let status = if suspended { UserStatus::Suspended } else { UserStatus::Active };
        let suspended_at = suspended.then_some(now_millis);

        if record.status == status && record.suspended_at == suspended_at {
            return MergeOutcome::Unchanged;
        }

        record.status = status;
        record.suspended_at = suspended_at;

        MergeOutcome::Applied
    }

    /// Restore the suspend-related fields from a pre-mutation snapshot.
    ///
    /// Used for optimistic rollback; only touches the fields the optimistic
    /// apply changed.
    pub fn restore_suspend(&mut self, id: &str, snapshot: &SuspendSnapshot) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            return false;
        };

        record.status = snapshot.status;
        record.suspended_at = snapshot.suspended_at;
        true
    }

    /// Replace a cached record with the server-returned authoritative one.
    ///
    /// Counters are adjusted by the difference so they stay consistent
    /// without a rescan.
    pub fn overwrite(&mut self, record: UserRecord) -> bool {
        let Some(cached) = self.records.get_mut(&record.id) else {
            return false;
        };

        if cached.online != record.online {
            if record.online {
                self.stats.active_users += 1;
            } else {
                self.stats.active_users = self.stats.active_users.saturating_sub(1);
            }
        }

        // Both message counters move in lockstep with the merge paths, so a
        // confirmed mutation adjusts both by the same difference.
        if record.message_count >= cached.message_count {
            let gained = record.message_count - cached.message_count;
            self.stats.total_messages = self.stats.total_messages.saturating_add(gained);
            self.stats.messages_last_24h = self.stats.messages_last_24h.saturating_add(gained);
        } else {
            let lost = cached.message_count - record.message_count;
            self.stats.total_messages = self.stats.total_messages.saturating_sub(lost);
            self.stats.messages_last_24h = self.stats.messages_last_24h.saturating_sub(lost);
        }

        *cached = record;
        true
    }

    /// Install initial page-load records, skipping ids already cached.
    ///
    /// Counters are folded in per record: `new_users_today` counts records
    /// created within the last 24 hours of `now_millis`;
    /// `messages_last_24h` stays untouched because the page load carries no
    /// per-message timing.
    ///
    /// Returns how many records were inserted.
    pub fn seed(&mut self, records: Vec<UserRecord>, now_millis: Timestamp) -> usize {
        let mut inserted = 0;

        for record in records {
            if self.records.contains_key(&record.id) {
                continue;
            }

            self.stats.total_users += 1;
            self.stats.total_messages = self.stats.total_messages.saturating_add(record.message_count);
            if record.online {
                self.stats.active_users += 1;
            }
            if record.created_at >= now_millis - DAY_MILLIS {
                self.stats.new_users_today += 1;
            }

            self.records.insert(record.id.clone(), record);
            inserted += 1;
        }

        inserted
    }

    /// Filtered, sorted view of the record set. Computed at read time.
    ///
    /// Ties always break by ascending id so the result is deterministic for
    /// any internal iteration order.
    #[must_use]
    pub fn query(&self, filter: UserFilter, sort: UserSort) -> Vec<UserRecord> {
        let mut view: Vec<&UserRecord> =
            self.records.values().filter(|r| filter.matches(r)).collect();

        view.sort_by(|a, b| sort_key(b, sort).cmp(&sort_key(a, sort)).then_with(|| a.id.cmp(&b.id)));

        view.into_iter().cloned().collect()
    }
}

/// Descending sort key for a record. Records without `last_active` sort
/// after every record that has one.
fn sort_key(record: &UserRecord, sort: UserSort) -> i64 {
    match sort {
        UserSort::LastActive => record.last_active.unwrap_or(i64::MIN),
        // Counts above i64::MAX saturate; they still sort above everything.
        UserSort::MessageCount => i64::try_from(record.message_count).unwrap_or(i64::MAX),
        UserSort::CreatedAt => record.created_at,
    }
}
