//! The JSON application envelope.
//!
//! Inbound text messages carry a command:
//! `{"action": "pub"|"sub"|"unsub", "key": <channel>, "data": <payload>}`
//! where `data` is only present (and required) for `pub`. Outbound fanout
//! messages carry `{"key": <channel>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

/// A command parsed from an inbound text message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientCommand {
    /// Publish `data` on the channel named `key`.
    Pub {
        /// Channel name.
        key: String,
        /// Payload to publish.
        data: String,
    },
    /// Subscribe to the channel named `key`.
    Sub {
        /// Channel name.
        key: String,
    },
    /// Unsubscribe from the channel named `key`.
    Unsub {
        /// Channel name.
        key: String,
    },
}

impl ClientCommand {
    /// Parse a command from raw message bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// An outbound fanout message.
#[derive(Debug, Serialize)]
struct Broadcast<'a> {
    key: &'a str,
    data: &'a str,
}

/// Encode the fanout envelope for a broker message.
pub fn encode_broadcast(channel: &str, payload: &str) -> String {
    serde_json::to_string(&Broadcast {
        key: channel,
        data: payload,
    })
    .expect("string-only struct always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sub() {
        let command = ClientCommand::parse(br#"{"action":"sub","key":"x"}"#).unwrap();
        assert_eq!(
            command,
            ClientCommand::Sub {
                key: "x".to_string()
            }
        );
    }

    #[test]
    fn test_parse_unsub() {
        let command = ClientCommand::parse(br#"{"action":"unsub","key":"x"}"#).unwrap();
        assert_eq!(
            command,
            ClientCommand::Unsub {
                key: "x".to_string()
            }
        );
    }

    #[test]
    fn test_parse_pub() {
        let command = ClientCommand::parse(br#"{"action":"pub","key":"x","data":"hi"}"#).unwrap();
        assert_eq!(
            command,
            ClientCommand::Pub {
                key: "x".to_string(),
                data: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_pub_requires_data() {
        assert!(ClientCommand::parse(br#"{"action":"pub","key":"x"}"#).is_err());
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(ClientCommand::parse(br#"{"action":"shout","key":"x"}"#).is_err());
    }

    #[test]
    fn test_missing_key_rejected() {
        assert!(ClientCommand::parse(br#"{"action":"sub"}"#).is_err());
    }

    #[test]
    fn test_non_string_fields_rejected() {
        assert!(ClientCommand::parse(br#"{"action":"sub","key":7}"#).is_err());
        assert!(ClientCommand::parse(br#"{"action":"pub","key":"x","data":[1]}"#).is_err());
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(ClientCommand::parse(b"not json").is_err());
    }

    #[test]
    fn test_encode_broadcast() {
        assert_eq!(encode_broadcast("x", "hi"), r#"{"key":"x","data":"hi"}"#);
    }

    #[test]
    fn test_encode_broadcast_escapes() {
        assert_eq!(
            encode_broadcast("x\"y", "line\nbreak"),
            r#"{"key":"x\"y","data":"line\nbreak"}"#
        );
    }
}
