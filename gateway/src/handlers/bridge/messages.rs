//! Bridge WebSocket message types
//!
//! The bridge forwards almost everything verbatim. Only the handful of client
//! event types it acts on are modelled here; every other type lands in
//! [`BridgeIncomingMessage::Other`] and is relayed untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::realtime::ScenarioParameters;
use crate::errors::BridgeError;

// =============================================================================
// Incoming Messages (Client -> Bridge)
// =============================================================================

/// Client events the bridge inspects before relaying.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeIncomingMessage {
    /// Session configuration; `parameters` are replaced by a generated payload
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(default)]
        parameters: Option<ScenarioParameters>,
    },

    /// Request a response; tracked for double-active detection
    #[serde(rename = "response.create")]
    ResponseCreate {},

    /// Cancel the in-flight response; clears response bookkeeping
    #[serde(rename = "response.cancel")]
    ResponseCancel {},

    /// Truncate an assistant item to what the client actually played
    #[serde(rename = "conversation.item.truncate")]
    ItemTruncate {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },

    /// Any other event type, forwarded verbatim
    #[serde(other)]
    Other,
}

impl BridgeIncomingMessage {
    /// Parse a client text frame.
    ///
    /// The frame must be a JSON object with a `type` field; anything else is
    /// rejected so the client can be told about it.
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        Ok(serde_json::from_str(text)?)
    }
}

// =============================================================================
// Outgoing Messages (Bridge -> Client)
// =============================================================================

/// Events generated by the bridge itself rather than relayed from upstream.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum BridgeOutgoingMessage {
    /// Upstream is open and the session is ready
    #[serde(rename = "connection.established")]
    ConnectionEstablished { session_id: String },

    /// Error raised by the bridge
    #[serde(rename = "error")]
    Error { error: BridgeErrorBody },
}

/// Body of a bridge-generated `error` event.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BridgeErrorBody {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub code: String,
    pub message: String,
}

impl BridgeOutgoingMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            error: BridgeErrorBody {
                error_type: "bridge_error",
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

impl From<&BridgeError> for BridgeOutgoingMessage {
    fn from(err: &BridgeError) -> Self {
        Self::error(err.code(), err.to_string())
    }
}

/// Routing for the client sender task.
#[derive(Debug)]
pub enum BridgeMessageRoute {
    /// Bridge-generated event
    Outgoing(BridgeOutgoingMessage),
    /// Upstream text frame relayed verbatim
    Relay(String),
    /// Close the client connection
    Close,
}

/// Value of the `type` field, for logging frames the bridge does not parse.
pub fn event_type(text: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(rename = "type")]
        event_type: Option<Value>,
    }

    serde_json::from_str::<Envelope>(text)
        .ok()?
        .event_type?
        .as_str()
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_update_with_parameters() {
        let msg = BridgeIncomingMessage::parse(
            r#"{"type":"session.update","parameters":{"voice":"AndrewNeural","mood":"cheerful"}}"#,
        )
        .unwrap();

        match msg {
            BridgeIncomingMessage::SessionUpdate {
                parameters: Some(params),
            } => {
                assert_eq!(params.voice.as_deref(), Some("AndrewNeural"));
                assert_eq!(params.mood.as_deref(), Some("cheerful"));
            }
            other => panic!("Expected SessionUpdate with parameters, got {other:?}"),
        }
    }

    #[test]
    fn test_session_update_without_parameters() {
        let msg = BridgeIncomingMessage::parse(
            r#"{"type":"session.update","session":{"voice":"ash"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            BridgeIncomingMessage::SessionUpdate { parameters: None }
        ));
    }

    #[test]
    fn test_extra_fields_tolerated() {
        let msg = BridgeIncomingMessage::parse(
            r#"{"type":"response.create","response":{"modalities":["text"]}}"#,
        )
        .unwrap();
        assert!(matches!(msg, BridgeIncomingMessage::ResponseCreate {}));

        let msg = BridgeIncomingMessage::parse(r#"{"type":"response.cancel","event_id":"e1"}"#)
            .unwrap();
        assert!(matches!(msg, BridgeIncomingMessage::ResponseCancel {}));
    }

    #[test]
    fn test_unknown_type_is_other() {
        let msg = BridgeIncomingMessage::parse(
            r#"{"type":"input_audio_buffer.append","audio":"AAAA"}"#,
        )
        .unwrap();
        assert!(matches!(msg, BridgeIncomingMessage::Other));

        let msg = BridgeIncomingMessage::parse(r#"{"type":"some.future.event"}"#).unwrap();
        assert!(matches!(msg, BridgeIncomingMessage::Other));
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(BridgeIncomingMessage::parse("{not json").is_err());
        assert!(BridgeIncomingMessage::parse(r#"{"no_type":true}"#).is_err());
        assert!(BridgeIncomingMessage::parse("[1,2,3]").is_err());

        let err = BridgeIncomingMessage::parse("{not json").unwrap_err();
        assert_eq!(err.code(), "parse_error");
    }

    #[test]
    fn test_connection_established_serialization() {
        let msg = BridgeOutgoingMessage::ConnectionEstablished {
            session_id: "abc".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({"type": "connection.established", "session_id": "abc"})
        );
    }

    #[test]
    fn test_error_serialization() {
        let msg = BridgeOutgoingMessage::error("parse_error", "Invalid message format: eof");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({
                "type": "error",
                "error": {
                    "type": "bridge_error",
                    "code": "parse_error",
                    "message": "Invalid message format: eof"
                }
            })
        );
    }

    #[test]
    fn test_event_type() {
        assert_eq!(
            event_type(r#"{"type":"response.done","response":{}}"#).as_deref(),
            Some("response.done")
        );
        assert_eq!(event_type("garbage"), None);
        assert_eq!(event_type(r#"{"type":5}"#), None);
    }
}
