//! Realtime conversation protocol.
//!
//! Event types shared by the bridge and its clients, the upstream endpoint's
//! configuration constants, and the session configuration builder.
//!
//! # Audio Format
//!
//! Mono PCM 16-bit signed little-endian at 24kHz, base64-encoded inside JSON
//! text frames.
//!
//! # Example
//!
//! ```rust,ignore
//! use voicebridge_gateway::core::realtime::{
//!     build_session_config, PlaceholderTemplate, ScenarioParameters, SessionDefaults,
//! };
//!
//! let params = ScenarioParameters {
//!     voice: Some("AndrewNeural".to_string()),
//!     ..Default::default()
//! };
//! let session = build_session_config(
//!     &params,
//!     &SessionDefaults::default(),
//!     &PlaceholderTemplate::default(),
//! )?;
//! assert_eq!(session.voice.as_deref(), Some("echo"));
//! ```

pub mod config;
pub mod messages;
pub mod session_config;
pub mod template;

pub use config::{
    DEFAULT_REALTIME_MODEL, DEFAULT_TEMPERATURE, DEFAULT_TRANSCRIPTION_MODEL, MAX_TEMPERATURE,
    MIN_TEMPERATURE, RealtimeVoice, UPSTREAM_REALTIME_URL, clamp_temperature, upstream_url,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, ErrorPayload, InputAudioTranscription,
    ResponseConfig, ResponseInfo, ServerEvent, SessionConfig, TurnDetection,
};
pub use session_config::{
    FALLBACK_INSTRUCTIONS, ScenarioParameters, SessionDefaults, build_session_config,
    default_turn_detection, resolve_voice,
};
pub use template::{DEFAULT_TEMPLATE, InstructionTemplate, PlaceholderTemplate, TemplateError};
