//! Cross-instance invalidation envelope.
//!
//! Every instance publishes invalidations on a well-known channel and
//! applies the ones it receives locally, keeping L1 caches coherent
//! across instances without a shared lock.

use serde::{Deserialize, Serialize};

/// The well-known pub/sub channel for invalidation events.
pub const INVALIDATION_CHANNEL: &str = "cache:invalidation";

/// JSON envelope carried on [`INVALIDATION_CHANNEL`].
///
/// Wire examples:
/// `{"type":"key","key":"user:42"}`,
/// `{"type":"pattern","pattern":"user:*"}`,
/// `{"type":"tag","tag":"user"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InvalidationEvent {
    Key { key: String },
    Pattern { pattern: String },
    Tag { tag: String },
}

impl InvalidationEvent {
    /// Serializes the envelope for publishing.
    ///
    /// # Errors
    ///
    /// Serialization of this enum cannot realistically fail; the error is
    /// propagated for completeness.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses an envelope received from the channel.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let event = InvalidationEvent::Key {
            key: "user:42".to_string(),
        };
        assert_eq!(event.to_payload().unwrap(), r#"{"type":"key","key":"user:42"}"#);

        let event = InvalidationEvent::Pattern {
            pattern: "user:*".to_string(),
        };
        assert_eq!(
            event.to_payload().unwrap(),
            r#"{"type":"pattern","pattern":"user:*"}"#
        );

        let event = InvalidationEvent::Tag {
            tag: "user".to_string(),
        };
        assert_eq!(event.to_payload().unwrap(), r#"{"type":"tag","tag":"user"}"#);
    }

    #[test]
    fn test_round_trip() {
        let event = InvalidationEvent::Tag {
            tag: "catalog".to_string(),
        };
        let parsed = InvalidationEvent::from_payload(&event.to_payload().unwrap()).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(InvalidationEvent::from_payload("not json").is_err());
        assert!(InvalidationEvent::from_payload(r#"{"type":"unknown","x":1}"#).is_err());
    }
}
