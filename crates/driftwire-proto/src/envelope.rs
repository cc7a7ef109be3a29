//! JSON envelope wrapping every push frame.
//!
//! Every text frame from the push channel is one envelope:
//! `{"success": bool, "message": "<tag>", "data": {...} | null}`.
//!
//! Envelope parsing is the only fallible step on the ingestion path. A frame
//! that is not valid envelope JSON is a decode error the caller logs and
//! drops; everything past this point (unknown tags, ill-typed `data`)
//! degrades to [`crate::Event::Unknown`] instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error produced when a text frame is not a well-formed envelope.
///
/// This is recoverable by policy: the ingestion path logs the frame and
/// continues with the next one. It never propagates to subscribers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed envelope: {reason}")]
pub struct EnvelopeError {
    /// Parser message describing what was malformed.
    pub reason: String,
}

/// Wire-level wrapper around every push frame.
///
/// # Invariants
///
/// - `message` is the event tag used for dispatch; it is never interpreted
///   when `success` is `false` (such frames are ignored upstream).
/// - `data` is kept as raw JSON so that tag-specific decoding can degrade
///   gracefully instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Whether the server marked this frame as a successful notification.
    pub success: bool,

    /// Event tag (e.g. `user_status`, `new_user`).
    pub message: String,

    /// Tag-specific payload. `None` when the server sent `null` or omitted
    /// the field.
    #[serde(default)]
    pub data: Option<Value>,
}

impl Envelope {
    /// Parse one text frame into an envelope.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError`] if the frame is not valid JSON or does not have
    ///   the envelope shape.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(text).map_err(|e| EnvelopeError { reason: e.to_string() })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_envelope() {
        let env = Envelope::parse(
            r#"{"success": true, "message": "user_status", "data": {"userId": "u1"}}"#,
        )
        .unwrap();

        assert!(env.success);
        assert_eq!(env.message, "user_status");
        assert!(env.data.is_some());
    }

    #[test]
    fn parse_null_data() {
        let env = Envelope::parse(r#"{"success": true, "message": "ping", "data": null}"#).unwrap();
        assert_eq!(env.data, None);
    }

    #[test]
    fn parse_missing_data_field() {
        let env = Envelope::parse(r#"{"success": false, "message": "error"}"#).unwrap();
        assert!(!env.success);
        assert_eq!(env.data, None);
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(Envelope::parse("not json").is_err());
    }

    #[test]
    fn parse_rejects_missing_tag() {
        assert!(Envelope::parse(r#"{"success": true}"#).is_err());
    }
}
