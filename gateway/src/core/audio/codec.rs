//! PCM16 frame codec.
//!
//! Converts between the float samples produced/consumed by audio devices and the
//! 16-bit signed little-endian PCM carried on the wire, and between raw bytes and
//! the base64 text embedded in JSON events.
//!
//! # Format
//!
//! - Mono, 16-bit signed, little-endian
//! - 24,000 Hz ([`SAMPLE_RATE`])

use base64::prelude::*;
use thiserror::Error;

/// Sample rate of every frame crossing the bridge.
pub const SAMPLE_RATE: u32 = 24_000;

/// Bytes per PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Transport text was not valid base64
    #[error("Invalid transport encoding: {0}")]
    InvalidTransport(#[from] base64::DecodeError),
}

/// Encode float samples into PCM16 little-endian bytes.
///
/// Samples are clamped to `[-1.0, 1.0]`. Negative values scale by `0x8000`,
/// non-negative values by `0x7fff`, so both ends of the range map exactly onto
/// `i16::MIN` and `i16::MAX`.
pub fn encode_frame(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        out.extend_from_slice(&float_to_pcm16(sample).to_le_bytes());
    }
    out
}

/// Decode PCM16 little-endian bytes into float samples.
///
/// A trailing odd byte is dropped rather than rejected.
pub fn decode_frame(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| pcm16_to_float(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Encode bytes for embedding in a JSON text frame.
#[inline]
pub fn to_transport(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decode bytes embedded in a JSON text frame.
#[inline]
pub fn from_transport(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(BASE64_STANDARD.decode(text)?)
}

/// Duration in seconds of `sample_count` samples at [`SAMPLE_RATE`].
#[inline]
pub fn samples_duration_secs(sample_count: usize) -> f64 {
    sample_count as f64 / SAMPLE_RATE as f64
}

/// Duration in milliseconds of a PCM16 byte payload at [`SAMPLE_RATE`].
#[inline]
pub fn pcm16_duration_ms(byte_len: usize) -> f64 {
    samples_duration_secs(byte_len / BYTES_PER_SAMPLE) * 1000.0
}

#[inline]
pub(crate) fn float_to_pcm16(sample: f32) -> i16 {
    let s = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

#[inline]
pub(crate) fn pcm16_to_float(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32768.0
    } else {
        sample as f32 / 32767.0
    }
}
