//! Per-session bookkeeping for the in-flight remote response.

/// State of the remote response currently generated and/or played.
///
/// `active` follows the upstream lifecycle (`response.created` →
/// `response.done`). The playback fields (`speaking`, start time, played
/// duration) follow local output and may outlive `active`, because audio
/// usually arrives faster than it plays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseState {
    /// A response is being generated upstream
    pub active: bool,
    /// Response audio is audible right now
    pub speaking: bool,
    /// Output clock time (seconds) when playback started
    pub playback_started_at: Option<f64>,
    /// Total duration of audio handed to the output since playback started
    pub played_duration_ms: f64,
    /// Audio of the current item fully played in earlier runs (after an
    /// underrun drained the output mid-response)
    pub completed_audio_ms: f64,
    /// Upstream response id, when known
    pub response_id: Option<String>,
    /// Conversation item carrying the response audio (truncation target)
    pub item_id: Option<String>,
    /// An interruption was already issued for this response
    pub interrupted: bool,
}

impl ResponseState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a new response.
    ///
    /// Returns `false` if a previous response was still active; the stale
    /// generation state is replaced so the session never holds two.
    pub fn begin_response(&mut self, response_id: Option<String>) -> bool {
        let was_idle = !self.active;
        self.active = true;
        self.interrupted = false;
        self.response_id = response_id;
        was_idle
    }

    /// Remember the item id later needed for truncation.
    pub fn set_item(&mut self, item_id: impl Into<String>) {
        let item_id = item_id.into();
        if self.item_id.as_deref() != Some(item_id.as_str()) {
            self.completed_audio_ms = 0.0;
        }
        self.item_id = Some(item_id);
    }

    /// Mark audio as audible, recording the start time on the first chunk.
    pub fn mark_speaking(&mut self, now: f64) {
        if !self.speaking {
            self.speaking = true;
            self.playback_started_at = Some(now);
            self.played_duration_ms = 0.0;
        }
    }

    pub fn add_played(&mut self, duration_ms: f64) {
        self.played_duration_ms += duration_ms;
    }

    /// Truncation position for the current item: audio handed to the output
    /// in this run plus runs that completed before an underrun.
    pub fn heard_ms(&self) -> u32 {
        (self.completed_audio_ms + self.played_duration_ms).round() as u32
    }

    /// Scheduled audio drained naturally.
    ///
    /// While the response is still being generated the played audio counts
    /// towards the item's heard position, since more audio may follow.
    pub fn finish_playback(&mut self) {
        if self.active {
            self.completed_audio_ms += self.played_duration_ms;
        } else {
            self.completed_audio_ms = 0.0;
            self.item_id = None;
        }
        self.clear_playback();
    }

    /// Scheduled audio was discarded before it finished.
    pub fn abandon_playback(&mut self) {
        self.completed_audio_ms = 0.0;
        if !self.active {
            self.item_id = None;
        }
        self.clear_playback();
    }

    fn clear_playback(&mut self) {
        self.speaking = false;
        self.playback_started_at = None;
        self.played_duration_ms = 0.0;
    }

    /// Upstream finished or cancelled generation.
    pub fn complete_response(&mut self) {
        self.active = false;
        self.interrupted = false;
        self.response_id = None;
        if !self.speaking {
            self.item_id = None;
            self.completed_audio_ms = 0.0;
        }
    }

    /// Back to the neutral state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }
}
