//! Gapless playback scheduling.
//!
//! Chunks arrive with network jitter and vary in length. Each one is scheduled
//! at `max(now, end_of_previous_chunk)` on the output clock, so audio plays
//! back-to-back in arrival order and is never scheduled before audio that is
//! already queued.

use tracing::{debug, trace};

use super::codec::{self, SAMPLE_RATE};
use crate::core::turn::ResponseState;

/// An output device driven by its own clock.
pub trait AudioOutput: Send {
    /// Current output clock time in seconds.
    fn current_time(&self) -> f64;

    /// Queue `samples` (mono, [`SAMPLE_RATE`]) to start at `start_at` seconds.
    fn schedule(&mut self, samples: Vec<f32>, start_at: f64);

    /// Silence and discard everything scheduled.
    fn stop_all(&mut self);

    /// Release the device. Must be idempotent.
    fn close(&mut self) {}
}

/// Placement of one chunk on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub start: f64,
    pub duration: f64,
}

impl ScheduledChunk {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Schedules response audio onto an [`AudioOutput`].
pub struct PlaybackScheduler<O> {
    output: O,
    /// End of the last scheduled chunk; `0.0` when nothing is scheduled
    scheduled_end_time: f64,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            scheduled_end_time: 0.0,
        }
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn now(&self) -> f64 {
        self.output.current_time()
    }

    pub fn scheduled_end_time(&self) -> f64 {
        self.scheduled_end_time
    }

    /// Schedule one PCM16 chunk and update the response position trackers.
    ///
    /// Empty chunks (including a lone odd byte) are ignored.
    pub fn enqueue(&mut self, pcm16: &[u8], state: &mut ResponseState) -> Option<ScheduledChunk> {
        let samples = codec::decode_frame(pcm16);
        if samples.is_empty() {
            trace!("Ignoring empty audio chunk");
            return None;
        }

        let now = self.output.current_time();
        let duration = samples.len() as f64 / SAMPLE_RATE as f64;
        let start = now.max(self.scheduled_end_time);

        self.output.schedule(samples, start);
        self.scheduled_end_time = start + duration;

        state.mark_speaking(now);
        state.add_played(duration * 1000.0);

        trace!(start, duration, "Scheduled playback chunk");
        Some(ScheduledChunk { start, duration })
    }

    /// Check whether scheduled audio has drained.
    ///
    /// Returns `true` exactly once per playback run, when the output clock has
    /// reached the end of the last scheduled chunk.
    pub fn poll_completion(&mut self, state: &mut ResponseState) -> bool {
        if !state.speaking {
            return false;
        }
        if self.output.current_time() < self.scheduled_end_time {
            return false;
        }
        debug!("Playback drained");
        self.scheduled_end_time = 0.0;
        state.finish_playback();
        true
    }

    /// Abandon all scheduled audio. Safe to call with nothing scheduled.
    pub fn reset(&mut self, state: &mut ResponseState) {
        self.output.stop_all();
        self.scheduled_end_time = 0.0;
        state.abandon_playback();
    }

    /// Release the output device.
    pub fn close(&mut self, state: &mut ResponseState) {
        self.reset(state);
        self.output.close();
    }
}
