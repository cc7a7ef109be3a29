//! User records, aggregate stats, and view query parameters.

use serde::{Deserialize, Serialize};

use crate::{Timestamp, UserId};

/// Display role of a user.
///
/// Roles are display-only metadata; unknown roles sent by newer servers
/// decode as [`UserRole::Member`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Full administrative access.
    Admin,
    /// Moderation privileges.
    Moderator,
    /// Regular member. Default for unknown roles.
    #[default]
    #[serde(other)]
    Member,
}

/// Account standing of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Account in good standing.
    #[default]
    Active,
    /// Account suspended by a moderator or admin.
    Suspended,
}

/// One cached user record.
///
/// Records are created by `new_user` events or by the initial page load and
/// are never deleted by this subsystem. All mutation goes through the merge
/// engine; the fields here mirror the wire representation (camelCase JSON)
/// so server-returned authoritative records deserialize directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Unique key.
    pub id: UserId,

    /// Display name.
    pub name: String,

    /// Contact email.
    pub email: String,

    /// Avatar URL. Empty when the server omitted it.
    #[serde(default)]
    pub avatar: String,

    /// Display role.
    #[serde(default, rename = "userRole")]
    pub role: UserRole,

    /// Account standing.
    #[serde(default)]
    pub status: UserStatus,

    /// Presence flag maintained by `user_status` events.
    #[serde(default)]
    pub online: bool,

    /// Last activity timestamp. `None` until the first `user_status` event
    /// that carries one.
    #[serde(default)]
    pub last_active: Option<Timestamp>,

    /// Creation timestamp. Stamped at decode time when the server omits it.
    #[serde(default)]
    pub created_at: Timestamp,

    /// Total messages sent, maintained by `message_sent` deltas.
    #[serde(default)]
    pub message_count: u64,

    /// When the current suspension was applied. `None` while active.
    #[serde(default)]
    pub suspended_at: Option<Timestamp>,
}

/// Derived aggregate counters over the record set.
///
/// # Invariants
///
/// - Maintained incrementally by the merge engine; never recomputed by a
///   full scan, keeping merges O(1) per event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    /// Number of cached records.
    pub total_users: u64,
    /// Records currently online.
    pub active_users: u64,
    /// Sum of all message-count deltas.
    pub total_messages: u64,
    /// Users created since the stats baseline.
    pub new_users_today: u64,
    /// Message deltas accepted since the stats baseline.
    pub messages_last_24h: u64,
}

/// Read-time filter over the record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserFilter {
    /// Every record.
    #[default]
    All,
    /// Only records with `online == true`.
    Online,
    /// Only records with `online == false`.
    Offline,
    /// Only records with suspended status.
    Suspended,
}

impl UserFilter {
    /// Whether `record` passes this filter.
    #[must_use]
    pub fn matches(self, record: &UserRecord) -> bool {
        match self {
            Self::All => true,
            Self::Online => record.online,
            Self::Offline => !record.online,
            Self::Suspended => record.status == UserStatus::Suspended,
        }
    }
}

/// Read-time sort key over the record set.
///
/// All sorts are descending by key; ties break by ascending id so query
/// results are deterministic for any input order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserSort {
    /// Most recently active first. Records without a `last_active` sort last.
    #[default]
    LastActive,
    /// Highest message count first.
    MessageCount,
    /// Newest account first.
    CreatedAt,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn record_deserializes_from_camel_case() {
        let record: UserRecord = serde_json::from_str(
            r#"{
                "id": "u1",
                "name": "Ada",
                "email": "ada@example.com",
                "userRole": "admin",
                "status": "suspended",
                "online": true,
                "lastActive": 1700000000000,
                "createdAt": 1690000000000,
                "messageCount": 7,
                "suspendedAt": 1699000000000
            }"#,
        )
        .unwrap();

        assert_eq!(record.role, UserRole::Admin);
        assert_eq!(record.status, UserStatus::Suspended);
        assert_eq!(record.message_count, 7);
        assert_eq!(record.suspended_at, Some(1_699_000_000_000));
    }

    #[test]
    fn record_defaults_optional_fields() {
        let record: UserRecord = serde_json::from_str(
            r#"{"id": "u2", "name": "Bob", "email": "bob@example.com"}"#,
        )
        .unwrap();

        assert_eq!(record.avatar, "");
        assert_eq!(record.role, UserRole::Member);
        assert_eq!(record.status, UserStatus::Active);
        assert!(!record.online);
        assert_eq!(record.last_active, None);
        assert_eq!(record.message_count, 0);
    }

    #[test]
    fn unknown_role_falls_back_to_member() {
        let record: UserRecord = serde_json::from_str(
            r#"{"id": "u3", "name": "C", "email": "c@example.com", "userRole": "superuser"}"#,
        )
        .unwrap();

        assert_eq!(record.role, UserRole::Member);
    }

    #[test]
    fn filter_matches() {
        let mut record: UserRecord =
            serde_json::from_str(r#"{"id": "u1", "name": "A", "email": "a@x"}"#).unwrap();

        assert!(UserFilter::All.matches(&record));
        assert!(UserFilter::Offline.matches(&record));
        assert!(!UserFilter::Online.matches(&record));
        assert!(!UserFilter::Suspended.matches(&record));

        record.online = true;
        record.status = UserStatus::Suspended;
        assert!(UserFilter::Online.matches(&record));
        assert!(UserFilter::Suspended.matches(&record));
    }
}
