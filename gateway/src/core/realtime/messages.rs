//! Realtime conversation event types.
//!
//! All events are JSON objects with a `type` discriminator, carried in
//! WebSocket text frames.
//!
//! # Protocol Overview
//!
//! Client events (client → bridge → upstream):
//! - session.update - Update session configuration (or scenario `parameters`)
//! - input_audio_buffer.append - Append audio to buffer
//! - input_audio_buffer.commit - Commit audio buffer
//! - input_audio_buffer.clear - Clear audio buffer
//! - conversation.item.create - Add item to conversation
//! - conversation.item.truncate - Truncate an assistant item to what was heard
//! - response.create - Generate a response
//! - response.cancel - Cancel current response
//!
//! Server events (upstream → bridge → client):
//! - connection.established - Bridge acknowledged the session (bridge-generated)
//! - session.created / session.updated
//! - input_audio_buffer.speech_started / speech_stopped / committed
//! - conversation.item.input_audio_transcription.completed
//! - conversation.item.truncated
//! - response.created - Response generation started
//! - response.output_item.added - Output item added
//! - response.audio.delta - Audio data chunk
//! - response.audio_transcript.delta - Transcript chunk
//! - response.done - Response complete
//! - error - Error occurred
//!
//! Server events are parsed leniently: unknown types map to
//! [`ServerEvent::Other`] and optional fields default.

use serde::{Deserialize, Serialize};

use super::session_config::ScenarioParameters;
use crate::core::audio::codec;

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent upstream in `session.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        /// Whether to create response on turn end
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Whether to interrupt on speech
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type
    #[serde(rename = "type", default)]
    pub item_type: String,
    /// Item status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
}

impl ConversationItem {
    /// A user text message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.into()),
                transcript: None,
            }]),
            ..Default::default()
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Transcript of audio content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

/// Response configuration for `response.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Response modalities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    /// Per-response instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

// =============================================================================
// Client Events
// =============================================================================

/// Client events sent towards the upstream endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration.
    ///
    /// The bridge replaces a `parameters` payload with a generated `session`.
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Upstream session configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<SessionConfig>,
        /// Scenario parameters for the bridge's configuration builder
        #[serde(skip_serializing_if = "Option::is_none")]
        parameters: Option<ScenarioParameters>,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
        /// Previous item ID to insert after
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
    },

    /// Truncate a conversation item
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: u32,
        /// Audio end in ms
        audio_end_ms: u32,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from raw PCM16 bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: codec::to_transport(data),
        }
    }

    /// Create a truncation event for the first audio content part.
    pub fn truncate(item_id: impl Into<String>, audio_end_ms: u32) -> Self {
        ClientEvent::ConversationItemTruncate {
            item_id: item_id.into(),
            content_index: 0,
            audio_end_ms,
        }
    }

    /// Wire `type` of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ConversationItemTruncate { .. } => "conversation.item.truncate",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
        }
    }
}

// =============================================================================
// Server Events
// =============================================================================

/// Server events received by a client of the bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The bridge opened the upstream leg and is ready
    #[serde(rename = "connection.established")]
    ConnectionEstablished {
        /// Bridge session ID
        session_id: String,
    },

    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ErrorPayload,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        #[serde(default)]
        session: serde_json::Value,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        #[serde(default)]
        session: serde_json::Value,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        #[serde(default)]
        audio_start_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        #[serde(default)]
        audio_end_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Audio buffer committed
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        /// New item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Transcript text
        transcript: String,
    },

    /// Conversation item truncated
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated {
        /// Item ID
        item_id: String,
        /// Audio end in ms
        #[serde(default)]
        audio_end_ms: Option<u32>,
    },

    /// Response created
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response information
        #[serde(default)]
        response: ResponseInfo,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        #[serde(default)]
        response: ResponseInfo,
    },

    /// Output item added to response
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Response ID
        #[serde(default)]
        response_id: Option<String>,
        /// Item
        item: ConversationItem,
    },

    /// Audio delta (audio data chunk)
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Response ID
        #[serde(default)]
        response_id: Option<String>,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Base64-encoded audio delta
        delta: String,
    },

    /// Audio done
    #[serde(rename = "response.audio.done")]
    AudioDone {
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Audio transcript delta
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Transcript delta
        delta: String,
    },

    /// Audio transcript done
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Full transcript
        #[serde(default)]
        transcript: String,
    },

    /// Any event type the client does not act on
    #[serde(other)]
    Other,
}

// =============================================================================
// Supporting Types
// =============================================================================

/// `error` payload: upstream sends a structured object, the bridge may send
/// either form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    /// Structured error
    Detail(ApiError),
    /// Plain message
    Message(String),
}

impl ErrorPayload {
    pub fn message(&self) -> &str {
        match self {
            ErrorPayload::Detail(detail) => &detail.message,
            ErrorPayload::Message(message) => message,
        }
    }
}

/// Structured error information.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    pub message: String,
    /// Event ID that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Response information.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseInfo {
    /// Response ID
    #[serde(default)]
    pub id: Option<String>,
    /// Response status (completed, cancelled, failed, incomplete)
    #[serde(default)]
    pub status: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_serialization() {
        let event = ClientEvent::InputAudioBufferCommit;
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, json!({"type": "input_audio_buffer.commit"}));
    }

    #[test]
    fn test_audio_append() {
        let data = vec![0u8, 1, 2, 3];
        match ClientEvent::audio_append(&data) {
            ClientEvent::InputAudioBufferAppend { audio } => {
                assert_eq!(codec::from_transport(&audio).unwrap(), data);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_truncate_serialization() {
        let json = serde_json::to_value(ClientEvent::truncate("item_9", 1234)).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "conversation.item.truncate",
                "item_id": "item_9",
                "content_index": 0,
                "audio_end_ms": 1234
            })
        );
    }

    #[test]
    fn test_event_type_matches_wire_tag() {
        let events = [
            ClientEvent::ResponseCancel,
            ClientEvent::ResponseCreate { response: None },
            ClientEvent::truncate("a", 1),
            ClientEvent::audio_append(&[]),
            ClientEvent::ConversationItemCreate {
                item: ConversationItem::user_text("hi"),
                previous_item_id: None,
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn test_turn_detection_is_server_vad() {
        let parsed: TurnDetection =
            serde_json::from_value(json!({"type": "server_vad", "threshold": 0.5})).unwrap();
        assert!(matches!(parsed, TurnDetection::ServerVad { threshold: Some(t), .. } if t == 0.5));

        // only server-side VAD is configured by the bridge
        assert!(serde_json::from_value::<TurnDetection>(json!({"type": "semantic_vad"})).is_err());
    }

    #[test]
    fn test_session_update_with_parameters_omits_session() {
        let event = ClientEvent::SessionUpdate {
            session: None,
            parameters: Some(ScenarioParameters {
                voice: Some("AndrewNeural".to_string()),
                ..Default::default()
            }),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.update");
        assert!(json.get("session").is_none());
        assert_eq!(json["parameters"]["voice"], "AndrewNeural");
    }

    #[test]
    fn test_error_payload_both_forms() {
        let structured: ServerEvent = serde_json::from_value(json!({
            "type": "error",
            "error": {"type": "invalid_request_error", "message": "Test error"}
        }))
        .unwrap();
        match structured {
            ServerEvent::Error { error } => assert_eq!(error.message(), "Test error"),
            _ => panic!("Wrong event type"),
        }

        let plain: ServerEvent =
            serde_json::from_value(json!({"type": "error", "error": "boom"})).unwrap();
        match plain {
            ServerEvent::Error { error } => assert_eq!(error.message(), "boom"),
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_unknown_server_event_is_other() {
        let event: ServerEvent =
            serde_json::from_value(json!({"type": "rate_limits.updated", "rate_limits": []}))
                .unwrap();
        assert_eq!(event, ServerEvent::Other);
    }

    #[test]
    fn test_lenient_output_item_added() {
        let event: ServerEvent = serde_json::from_value(json!({
            "type": "response.output_item.added",
            "item": {"id": "item_1", "role": "assistant"}
        }))
        .unwrap();
        match event {
            ServerEvent::OutputItemAdded { item, response_id } => {
                assert_eq!(item.id.as_deref(), Some("item_1"));
                assert_eq!(item.role.as_deref(), Some("assistant"));
                assert!(response_id.is_none());
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_connection_established() {
        let event: ServerEvent = serde_json::from_value(json!({
            "type": "connection.established",
            "session_id": "abc"
        }))
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::ConnectionEstablished {
                session_id: "abc".to_string()
            }
        );
    }
}
