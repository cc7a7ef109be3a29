//! Typed events decoded from push envelopes.
//!
//! [`Event::decode`] is the event decoder: it maps an envelope's tag to one
//! variant through an explicit tag table and validates the required `data`
//! fields. Decoding never fails and never panics. A recognized tag with
//! missing or ill-typed required fields, or a tag this client does not know,
//! produces [`Event::Unknown`] — the catch-all that keeps old clients
//! forward compatible with server-added event types.

use serde_json::Value;

use crate::{Envelope, Timestamp, UserId, UserRecord};

/// Tag for presence changes.
const TAG_USER_STATUS: &str = "user_status";
/// Tag for message-count deltas. The wire field is named `messageCount` but
/// carries a delta, not an absolute value.
const TAG_MESSAGE_SENT: &str = "message_sent";
/// Tag for newly created users.
const TAG_NEW_USER: &str = "new_user";
/// Tag for suspension changes.
const TAG_USER_SUSPENDED: &str = "user_suspended";

/// One decoded push event, consumed exactly once by the merge engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A user was created (`new_user`).
    UserCreated(UserRecord),

    /// A user's presence changed (`user_status`).
    UserStatusChanged {
        /// Target record.
        id: UserId,
        /// New presence flag.
        online: bool,
        /// New last-activity timestamp. `None` leaves the cached value
        /// unchanged.
        last_active: Option<Timestamp>,
    },

    /// A user's message count increased (`message_sent`).
    MessageCountIncremented {
        /// Target record.
        id: UserId,
        /// Amount to add. Duplicate delivery double-counts; the wire
        /// protocol carries no idempotency key for these frames.
        delta: u64,
    },

    /// A user was suspended or reinstated (`user_suspended`).
    UserSuspended {
        /// Target record.
        id: UserId,
        /// `true` to suspend, `false` to reinstate.
        suspended: bool,
        /// Actor that performed the change.
        by: UserId,
    },

    /// Unrecognized tag or ill-typed payload. Inert by design.
    Unknown {
        /// The raw tag as received.
        tag: String,
    },
}

impl Event {
    /// Decode an envelope into a typed event.
    ///
    /// `now_millis` stamps `created_at` on `new_user` records whose payload
    /// omits the field.
    ///
    /// Callers must ignore envelopes with `success == false` before calling
    /// this; the tag of such frames describes an error, not an event.
    #[must_use]
    pub fn decode(envelope: &Envelope, now_millis: Timestamp) -> Self {
        let tag = envelope.message.as_str();
        let data = envelope.data.as_ref();

        match tag {
            TAG_USER_STATUS => decode_user_status(tag, data),
            TAG_MESSAGE_SENT => decode_message_sent(tag, data),
            TAG_NEW_USER => decode_new_user(tag, data, now_millis),
            TAG_USER_SUSPENDED => decode_user_suspended(tag, data),
            _ => Self::Unknown { tag: tag.to_string() },
        }
    }

    /// Target record id, if this event addresses a single record.
    #[must_use]
    pub fn target(&self) -> Option<&UserId> {
        match self {
            Self::UserCreated(record) => Some(&record.id),
            Self::UserStatusChanged { id, .. }
            | Self::MessageCountIncremented { id, .. }
            | Self::UserSuspended { id, .. } => Some(id),
            Self::Unknown { .. } => None,
        }
    }
}

/// Extract a user id that may arrive as a JSON string or number.
fn field_id(data: &Value, key: &str) -> Option<UserId> {
    match data.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn unknown(tag: &str) -> Event {
    Event::Unknown { tag: tag.to_string() }
}

fn decode_user_status(tag: &str, data: Option<&Value>) -> Event {
    let Some(data) = data else { return unknown(tag) };
    let Some(id) = field_id(data, "userId") else { return unknown(tag) };
    let Some(online) = data.get("online").and_then(Value::as_bool) else { return unknown(tag) };

    let last_active = data.get("lastActive").and_then(Value::as_i64);

    Event::UserStatusChanged { id, online, last_active }
}

fn decode_message_sent(tag: &str, data: Option<&Value>) -> Event {
    let Some(data) = data else { return unknown(tag) };
    let Some(id) = field_id(data, "userId") else { return unknown(tag) };
    // Negative or fractional deltas are ill-typed, not clamped.
    let Some(delta) = data.get("messageCount").and_then(Value::as_u64) else {
        return unknown(tag);
    };

    Event::MessageCountIncremented { id, delta }
}

fn decode_new_user(tag: &str, data: Option<&Value>, now_millis: Timestamp) -> Event {
    let Some(data) = data else { return unknown(tag) };

    let Ok(mut record) = serde_json::from_value::<UserRecord>(data.clone()) else {
        return unknown(tag);
    };

    if record.id.is_empty() {
        return unknown(tag);
    }

    if record.created_at == 0 {
        record.created_at = now_millis;
    }

    Event::UserCreated(record)
}

fn decode_user_suspended(tag: &str, data: Option<&Value>) -> Event {
    let Some(data) = data else { return unknown(tag) };
    let Some(id) = field_id(data, "userId") else { return unknown(tag) };
    let Some(suspended) = data.get("suspended").and_then(Value::as_bool) else {
        return unknown(tag);
    };
    let Some(by) = field_id(data, "suspendedBy") else { return unknown(tag) };

    Event::UserSuspended { id, suspended, by }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope(tag: &str, data: Value) -> Envelope {
        Envelope { success: true, message: tag.to_string(), data: Some(data) }
    }

    #[test]
    fn decode_user_status_full() {
        let env = envelope(
            "user_status",
            json!({"userId": "u1", "online": true, "lastActive": 1700000000000_i64}),
        );

        assert_eq!(Event::decode(&env, 0), Event::UserStatusChanged {
            id: "u1".to_string(),
            online: true,
            last_active: Some(1_700_000_000_000),
        });
    }

    #[test]
    fn decode_user_status_without_last_active() {
        let env = envelope("user_status", json!({"userId": "u1", "online": false}));

        assert_eq!(Event::decode(&env, 0), Event::UserStatusChanged {
            id: "u1".to_string(),
            online: false,
            last_active: None,
        });
    }

    #[test]
    fn decode_numeric_user_id() {
        let env = envelope("user_status", json!({"userId": 42, "online": true}));

        assert!(matches!(
            Event::decode(&env, 0),
            Event::UserStatusChanged { id, .. } if id == "42"
        ));
    }

    #[test]
    fn decode_message_sent_is_a_delta() {
        let env = envelope("message_sent", json!({"userId": "u1", "messageCount": 3}));

        assert_eq!(Event::decode(&env, 0), Event::MessageCountIncremented {
            id: "u1".to_string(),
            delta: 3,
        });
    }

    #[test]
    fn decode_negative_delta_degrades_to_unknown() {
        let env = envelope("message_sent", json!({"userId": "u1", "messageCount": -3}));

        assert_eq!(Event::decode(&env, 0), Event::Unknown { tag: "message_sent".to_string() });
    }

    #[test]
    fn decode_new_user_stamps_missing_created_at() {
        let env = envelope("new_user", json!({"id": "u9", "name": "N", "email": "n@x"}));

        match Event::decode(&env, 1_234) {
            Event::UserCreated(record) => {
                assert_eq!(record.id, "u9");
                assert_eq!(record.created_at, 1_234);
            },
            other => panic!("expected UserCreated, got {other:?}"),
        }
    }

    #[test]
    fn decode_new_user_keeps_server_created_at() {
        let env = envelope(
            "new_user",
            json!({"id": "u9", "name": "N", "email": "n@x", "createdAt": 99}),
        );

        match Event::decode(&env, 1_234) {
            Event::UserCreated(record) => assert_eq!(record.created_at, 99),
            other => panic!("expected UserCreated, got {other:?}"),
        }
    }

    #[test]
    fn decode_user_suspended() {
        let env = envelope(
            "user_suspended",
            json!({"userId": "u1", "suspended": true, "suspendedBy": "admin-7"}),
        );

        assert_eq!(Event::decode(&env, 0), Event::UserSuspended {
            id: "u1".to_string(),
            suspended: true,
            by: "admin-7".to_string(),
        });
    }

    #[test]
    fn unknown_tag_is_catch_all() {
        let env = envelope("server_maintenance", json!({"at": 12}));

        assert_eq!(Event::decode(&env, 0), Event::Unknown {
            tag: "server_maintenance".to_string(),
        });
    }

    #[test]
    fn known_tag_with_missing_fields_degrades_to_unknown() {
        let env = envelope("user_status", json!({"online": true}));

        assert_eq!(Event::decode(&env, 0), Event::Unknown { tag: "user_status".to_string() });
    }

    #[test]
    fn known_tag_with_null_data_degrades_to_unknown() {
        let env = Envelope { success: true, message: "user_status".to_string(), data: None };

        assert_eq!(Event::decode(&env, 0), Event::Unknown { tag: "user_status".to_string() });
    }

    #[test]
    fn target_reports_record_id() {
        let env = envelope("user_status", json!({"userId": "u1", "online": true}));
        let event = Event::decode(&env, 0);

        assert_eq!(event.target().map(String::as_str), Some("u1"));
        assert_eq!(Event::Unknown { tag: "x".to_string() }.target(), None);
    }
}
