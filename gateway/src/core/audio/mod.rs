//! Audio path: wire codec, microphone capture buffering and gapless playback.
//!
//! Audio on the wire is mono PCM16 little-endian at [`SAMPLE_RATE`] Hz.

pub mod capture;
pub mod codec;
pub mod playback;

pub use capture::{
    AudioFrame, CaptureBuffer, CaptureConfig, CaptureHandle, FlushOutcome, FrameSender,
};
pub use codec::{CodecError, SAMPLE_RATE, decode_frame, encode_frame, from_transport, to_transport};
pub use playback::{AudioOutput, PlaybackScheduler, ScheduledChunk};
