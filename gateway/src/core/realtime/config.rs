//! Upstream realtime endpoint configuration types.
//!
//! - Endpoint URL and default model
//! - The upstream's enumerated voice set
//! - Turn detection and temperature bounds

use serde::{Deserialize, Serialize};

/// Upstream realtime WebSocket endpoint.
pub const UPSTREAM_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default upstream model.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Default model for transcribing user audio.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Wire audio format for both directions.
pub const AUDIO_FORMAT_PCM16: &str = "pcm16";

/// Temperature used when none is supplied.
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Lowest temperature the upstream accepts.
pub const MIN_TEMPERATURE: f32 = 0.6;

/// Highest temperature the upstream accepts.
pub const MAX_TEMPERATURE: f32 = 1.2;

/// Server VAD activation threshold.
pub const VAD_THRESHOLD: f32 = 0.5;

/// Audio kept before detected speech, in ms.
pub const VAD_PREFIX_PADDING_MS: u32 = 300;

/// Silence that ends the user's turn, in ms.
pub const VAD_SILENCE_DURATION_MS: u32 = 500;

// =============================================================================
// Voices
// =============================================================================

/// Voices accepted by the upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeVoice {
    /// Alloy voice (default)
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl RealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse an upstream voice id (case-insensitive).
    ///
    /// Returns `None` for identifiers outside the upstream set; those go
    /// through the alias table in the session configuration builder.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|voice| voice.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Get all available voices.
    pub fn all() -> &'static [RealtimeVoice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl std::fmt::Display for RealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Clamp a requested temperature to the upstream's accepted range.
///
/// Non-finite values fall back to [`DEFAULT_TEMPERATURE`].
pub fn clamp_temperature(value: f32) -> f32 {
    if !value.is_finite() {
        return DEFAULT_TEMPERATURE;
    }
    value.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

/// Build the upstream URL for `model`.
pub fn upstream_url(base: &str, model: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}model={model}")
}
