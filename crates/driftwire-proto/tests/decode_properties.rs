//! Property-based tests for envelope parsing and event decoding.
//!
//! The decoder's contract is total: for ANY input text and ANY envelope
//! shape it must return without panicking, and tag-level problems must
//! degrade to `Event::Unknown` rather than fail. Uses proptest to generate
//! arbitrary frames and verify these properties.

use driftwire_proto::{Envelope, Event};
use proptest::prelude::*;
use serde_json::{Value, json};

/// Strategy for arbitrary JSON values a hostile or future server might put
/// in `data`.
fn arbitrary_data() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9_]{0,16}".prop_map(Value::from),
    ];

    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::hash_map("[a-zA-Z]{1,12}", inner, 0..4)
                .prop_map(|m| Value::from(serde_json::Map::from_iter(m))),
        ]
    })
}

/// Strategy covering the recognized tags plus arbitrary ones.
fn arbitrary_tag() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("user_status".to_string()),
        Just("message_sent".to_string()),
        Just("new_user".to_string()),
        Just("user_suspended".to_string()),
        "[a-z_]{0,24}",
    ]
}

#[test]
fn prop_envelope_parse_never_panics() {
    proptest!(|(text in ".{0,256}")| {
        // PROPERTY: parsing arbitrary text either yields an envelope or an
        // error, never a panic.
        let _ = Envelope::parse(&text);
    });
}

#[test]
fn prop_decode_is_total() {
    proptest!(|(tag in arbitrary_tag(), data in prop::option::of(arbitrary_data()))| {
        let envelope = Envelope { success: true, message: tag, data };

        // PROPERTY: decode always returns an event; malformed payloads for
        // known tags degrade to Unknown instead of failing.
        let _ = Event::decode(&envelope, 0);
    });
}

#[test]
fn prop_unknown_preserves_raw_tag() {
    proptest!(|(tag in "[a-z_]{1,24}", data in prop::option::of(arbitrary_data()))| {
        prop_assume!(!matches!(
            tag.as_str(),
            "user_status" | "message_sent" | "new_user" | "user_suspended"
        ));

        let envelope = Envelope { success: true, message: tag.clone(), data };

        // PROPERTY: unrecognized tags map to Unknown carrying the raw tag.
        prop_assert_eq!(Event::decode(&envelope, 0), Event::Unknown { tag });
    });
}

#[test]
fn prop_well_formed_user_status_always_decodes() {
    proptest!(|(id in "[a-z0-9-]{1,12}", online: bool, last in prop::option::of(0..i64::MAX))| {
        let mut data = json!({"userId": id.clone(), "online": online});
        if let Some(ts) = last
            && let Some(map) = data.as_object_mut()
        {
            map.insert("lastActive".to_string(), Value::from(ts));
        }

        let envelope = Envelope { success: true, message: "user_status".to_string(), data: Some(data) };

        prop_assert_eq!(Event::decode(&envelope, 0), Event::UserStatusChanged {
            id,
            online,
            last_active: last,
        });
    });
}

#[test]
fn prop_envelope_roundtrip() {
    proptest!(|(success: bool, tag in "[a-z_]{0,24}", data in prop::option::of(arbitrary_data()))| {
        let envelope = Envelope { success, message: tag, data };
        let text = serde_json::to_string(&envelope).map_err(|e| {
            TestCaseError::fail(e.to_string())
        })?;

        prop_assert_eq!(Envelope::parse(&text), Ok(envelope));
    });
}
