//! Session configuration builder.
//!
//! Turns scenario parameters (as sent by a client in `session.update`) into
//! the upstream session payload: instructions, voice, temperature and turn
//! detection. Instruction text comes from an [`InstructionTemplate`]; voice
//! normalization and temperature bounds are owned here.

use phf::phf_map;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::config::{
    AUDIO_FORMAT_PCM16, DEFAULT_TEMPERATURE, DEFAULT_TRANSCRIPTION_MODEL, RealtimeVoice,
    VAD_PREFIX_PADDING_MS, VAD_SILENCE_DURATION_MS, VAD_THRESHOLD, clamp_temperature,
};
use super::messages::{InputAudioTranscription, SessionConfig, TurnDetection};
use super::template::{InstructionTemplate, TemplateError};

/// Instructions used when the template renders to nothing.
pub const FALLBACK_INSTRUCTIONS: &str =
    "You are a helpful assistant having a spoken conversation. Keep replies brief.";

// =============================================================================
// Voice Aliases
// =============================================================================

/// Voice names used elsewhere in the system, mapped to the nearest upstream
/// voice. Keys are lowercase with any locale prefix removed.
static VOICE_ALIASES: phf::Map<&'static str, RealtimeVoice> = phf_map! {
    "andrewneural" => RealtimeVoice::Echo,
    "andrew" => RealtimeVoice::Echo,
    "brianneural" => RealtimeVoice::Ash,
    "brian" => RealtimeVoice::Ash,
    "guyneural" => RealtimeVoice::Verse,
    "guy" => RealtimeVoice::Verse,
    "davisneural" => RealtimeVoice::Ballad,
    "davis" => RealtimeVoice::Ballad,
    "christopherneural" => RealtimeVoice::Echo,
    "ryanneural" => RealtimeVoice::Ash,
    "avaneural" => RealtimeVoice::Shimmer,
    "ava" => RealtimeVoice::Shimmer,
    "emmaneural" => RealtimeVoice::Coral,
    "emma" => RealtimeVoice::Coral,
    "jennyneural" => RealtimeVoice::Alloy,
    "jenny" => RealtimeVoice::Alloy,
    "arianeural" => RealtimeVoice::Sage,
    "aria" => RealtimeVoice::Sage,
    "michelleneural" => RealtimeVoice::Shimmer,
    "sonianeural" => RealtimeVoice::Coral,
    "male" => RealtimeVoice::Echo,
    "female" => RealtimeVoice::Shimmer,
};

/// Normalize a requested voice to one the upstream accepts.
///
/// Upstream ids pass through, known aliases are mapped, and anything else
/// (including no voice at all) resolves to `default`.
pub fn resolve_voice(requested: Option<&str>, default: RealtimeVoice) -> RealtimeVoice {
    let Some(requested) = requested.map(str::trim).filter(|v| !v.is_empty()) else {
        return default;
    };

    if let Some(voice) = RealtimeVoice::parse(requested) {
        return voice;
    }

    // "en-US-AndrewNeural" -> "andrewneural"
    let key = requested
        .rsplit('-')
        .next()
        .unwrap_or(requested)
        .to_ascii_lowercase();
    match VOICE_ALIASES.get(key.as_str()) {
        Some(voice) => {
            debug!(requested, voice = %voice, "Mapped voice alias");
            *voice
        }
        None => {
            warn!(requested, fallback = %default, "Unknown voice, using default");
            default
        }
    }
}

// =============================================================================
// Scenario Parameters
// =============================================================================

/// Scenario parameters carried by a client's `session.update`.
///
/// Unknown keys are kept in `extra` and are available to the template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScenarioParameters {
    /// Text value of a named parameter, for template substitution.
    pub fn value(&self, name: &str) -> Option<String> {
        let known = match name {
            "voice" => self.voice.clone(),
            "temperature" => self.temperature.map(|t| t.to_string()),
            "persona" => self.persona.clone(),
            "scenario" => self.scenario.clone(),
            "mood" => self.mood.clone(),
            "language" => self.language.clone(),
            _ => None,
        };
        known.or_else(|| match self.extra.get(name)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Fallbacks applied when parameters leave a setting unspecified.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDefaults {
    pub voice: RealtimeVoice,
    pub temperature: f32,
    /// `None` disables transcription of user audio
    pub transcription_model: Option<String>,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            voice: RealtimeVoice::default(),
            temperature: DEFAULT_TEMPERATURE,
            transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
        }
    }
}

impl SessionDefaults {
    /// Defaults overridden by the connection's query string.
    pub fn with_overrides(&self, voice: Option<&str>, temperature: Option<f32>) -> Self {
        Self {
            voice: resolve_voice(voice, self.voice),
            temperature: clamp_temperature(temperature.unwrap_or(self.temperature)),
            transcription_model: self.transcription_model.clone(),
        }
    }
}

/// Turn detection used for every bridged session.
pub fn default_turn_detection() -> TurnDetection {
    TurnDetection::ServerVad {
        threshold: Some(VAD_THRESHOLD),
        prefix_padding_ms: Some(VAD_PREFIX_PADDING_MS),
        silence_duration_ms: Some(VAD_SILENCE_DURATION_MS),
        create_response: Some(true),
        interrupt_response: Some(true),
    }
}

/// Build the upstream session payload for `params`.
///
/// The result always carries non-empty instructions, an upstream voice id and
/// a temperature within the accepted range.
pub fn build_session_config(
    params: &ScenarioParameters,
    defaults: &SessionDefaults,
    template: &dyn InstructionTemplate,
) -> Result<SessionConfig, TemplateError> {
    let mut instructions = template.render(params)?;
    if instructions.trim().is_empty() {
        warn!("Template rendered empty instructions, using fallback");
        instructions = FALLBACK_INSTRUCTIONS.to_string();
    }

    let voice = resolve_voice(params.voice.as_deref(), defaults.voice);
    let temperature = clamp_temperature(params.temperature.unwrap_or(defaults.temperature));

    Ok(SessionConfig {
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        instructions: Some(instructions),
        voice: Some(voice.as_str().to_string()),
        input_audio_format: Some(AUDIO_FORMAT_PCM16.to_string()),
        output_audio_format: Some(AUDIO_FORMAT_PCM16.to_string()),
        input_audio_transcription: defaults
            .transcription_model
            .clone()
            .map(|model| InputAudioTranscription { model }),
        turn_detection: Some(default_turn_detection()),
        temperature: Some(temperature),
    })
}
