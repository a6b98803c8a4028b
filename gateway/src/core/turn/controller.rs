//! Client-side turn-taking.
//!
//! [`TurnController`] owns the playback scheduler, the response state and the
//! transcript buffer of one conversation, and is the only place that decides
//! whether the remote agent is speaking. Every method is synchronous: a
//! transition reads and writes session state without suspending, and the
//! events it produces are queued on the [`EventTransport`] in order.
//!
//! ```text
//!            request_capture            stop_capture / speech_stopped
//!   Idle ───────────────────▶ Listening ───────────────────▶ AwaitingResponse
//!    ▲                           ▲                                 │
//!    │ playback drained          │ barge-in: cancel, truncate,     │ first audio delta
//!    │ or response cancelled     │ reset playback                  ▼
//!    └──────────────────────── Speaking ◀──────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use super::response::ResponseState;
use super::transcript::{Role, TranscriptAccumulator, TranscriptMessage, TranscriptSink};
use crate::core::audio::codec;
use crate::core::audio::playback::{AudioOutput, PlaybackScheduler};
use crate::core::realtime::{ClientEvent, ConversationItem, ServerEvent};
use crate::core::transport::{EventTransport, TransportClosed};

/// Turn-taking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    /// Capturing user audio
    Listening,
    /// End of the user turn was signalled; no response audio yet
    AwaitingResponse,
    /// Response audio is playing
    Speaking,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::Listening => "listening",
            TurnState::AwaitingResponse => "awaiting_response",
            TurnState::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

/// Who decides that the user's turn is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnMode {
    /// The upstream's voice activity detection ends turns; capture stays on
    #[default]
    Continuous,
    /// The caller ends turns with [`TurnController::stop_capture`]
    Manual,
}

/// What a barge-in sent upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interruption {
    /// `response.cancel` was sent
    pub cancelled: bool,
    /// `conversation.item.truncate` was sent with this `audio_end_ms`
    pub truncated_at_ms: Option<u32>,
}

/// Result of [`TurnController::request_capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStart {
    Started,
    AlreadyListening,
    /// The in-flight response was interrupted first
    Interrupted(Interruption),
}

/// Turn-taking state machine for one conversation.
pub struct TurnController<O> {
    transport: Arc<dyn EventTransport>,
    scheduler: PlaybackScheduler<O>,
    response: ResponseState,
    transcript: TranscriptAccumulator,
    sink: Box<dyn TranscriptSink>,
    state: TurnState,
    mode: TurnMode,
    closed: bool,
}

impl<O: AudioOutput> TurnController<O> {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        output: O,
        sink: Box<dyn TranscriptSink>,
        mode: TurnMode,
    ) -> Self {
        Self {
            transport,
            scheduler: PlaybackScheduler::new(output),
            response: ResponseState::new(),
            transcript: TranscriptAccumulator::new(),
            sink,
            state: TurnState::Idle,
            mode,
            closed: false,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    pub fn response(&self) -> &ResponseState {
        &self.response
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<O> {
        &self.scheduler
    }

    pub fn output_mut(&mut self) -> &mut O {
        self.scheduler.output_mut()
    }

    /// Whether remote audio is audible right now.
    pub fn is_speaking(&self) -> bool {
        self.response.speaking
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn set_state(&mut self, next: TurnState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Turn state");
            self.state = next;
        }
    }

    fn send(&self, event: ClientEvent) {
        let event_type = event.event_type();
        if let Err(TransportClosed) = self.transport.send(event) {
            debug!(event_type, "Transport closed, event not sent");
        }
    }

    // =========================================================================
    // Local requests
    // =========================================================================

    /// The user wants to talk.
    ///
    /// If a response is in flight it is interrupted first: cancel, truncate
    /// the item to what was heard, drop scheduled audio, then listen.
    pub fn request_capture(&mut self) -> Result<CaptureStart, TransportClosed> {
        if self.closed || !self.transport.is_open() {
            return Err(TransportClosed);
        }
        if self.state == TurnState::Listening && !self.response.speaking {
            return Ok(CaptureStart::AlreadyListening);
        }

        let interruption = self.interrupt();
        self.set_state(TurnState::Listening);
        Ok(match interruption {
            Some(interruption) => CaptureStart::Interrupted(interruption),
            None => CaptureStart::Started,
        })
    }

    /// The user finished talking.
    ///
    /// In manual mode this commits the input buffer and requests a response;
    /// queued capture audio must already be flushed. Returns `false` when not
    /// listening.
    pub fn stop_capture(&mut self) -> bool {
        if self.state != TurnState::Listening {
            return false;
        }
        match self.mode {
            TurnMode::Manual => {
                self.send(ClientEvent::InputAudioBufferCommit);
                self.send(ClientEvent::ResponseCreate { response: None });
                self.set_state(TurnState::AwaitingResponse);
            }
            TurnMode::Continuous => self.set_state(TurnState::Idle),
        }
        true
    }

    /// Send a typed user message and request a response to it.
    pub fn send_text(&mut self, text: &str) -> Result<(), TransportClosed> {
        if self.closed || !self.transport.is_open() {
            return Err(TransportClosed);
        }
        self.interrupt();
        self.sink.emit(TranscriptMessage {
            role: Role::User,
            text: text.to_string(),
            item_id: None,
            interrupted: false,
        });
        self.send(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
            previous_item_id: None,
        });
        self.send(ClientEvent::ResponseCreate { response: None });
        self.set_state(TurnState::AwaitingResponse);
        Ok(())
    }

    /// Barge-in. A no-op when nothing is in flight or the current response
    /// was already interrupted.
    fn interrupt(&mut self) -> Option<Interruption> {
        let cancel = self.response.active && !self.response.interrupted;
        let truncate_item = if self.response.speaking {
            self.response.item_id.clone()
        } else {
            None
        };
        if !cancel && !self.response.speaking {
            return None;
        }

        // position must be read before the reset clears it
        let audio_end_ms = self.response.heard_ms();

        if cancel {
            self.send(ClientEvent::ResponseCancel);
        }
        let truncated_at_ms = truncate_item.map(|item_id| {
            self.send(ClientEvent::truncate(item_id, audio_end_ms));
            audio_end_ms
        });
        self.scheduler.reset(&mut self.response);
        if self.response.active {
            self.response.interrupted = true;
        }
        if let Some(message) = self.transcript.take(true) {
            self.sink.emit(message);
        }

        info!(cancelled = cancel, ?truncated_at_ms, "Interrupted response");
        Some(Interruption {
            cancelled: cancel,
            truncated_at_ms,
        })
    }

    // =========================================================================
    // Remote events
    // =========================================================================

    /// Apply one event received from the bridge.
    pub fn handle_server_event(&mut self, event: &ServerEvent) {
        if self.closed {
            return;
        }
        match event {
            ServerEvent::SpeechStarted { .. } => {
                if self.mode == TurnMode::Continuous {
                    self.interrupt();
                    self.set_state(TurnState::Listening);
                }
            }
            ServerEvent::SpeechStopped { .. } | ServerEvent::InputAudioBufferCommitted { .. } => {
                if self.mode == TurnMode::Continuous && self.state == TurnState::Listening {
                    self.set_state(TurnState::AwaitingResponse);
                }
            }
            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => {
                let text = transcript.trim();
                if !text.is_empty() {
                    self.sink.emit(TranscriptMessage {
                        role: Role::User,
                        text: text.to_string(),
                        item_id: item_id.clone(),
                        interrupted: false,
                    });
                }
            }
            ServerEvent::ResponseCreated { response } => {
                if !self.response.begin_response(response.id.clone()) {
                    warn!(
                        response_id = ?response.id,
                        "Response created while another was active, replacing it"
                    );
                    if let Some(message) = self.transcript.take(true) {
                        self.sink.emit(message);
                    }
                }
                if self.state != TurnState::Speaking {
                    self.set_state(TurnState::AwaitingResponse);
                }
            }
            ServerEvent::OutputItemAdded { item, .. } => {
                let is_assistant = item.role.as_deref().is_none_or(|role| role == "assistant");
                if is_assistant && let Some(id) = &item.id {
                    self.response.set_item(id.clone());
                    self.transcript.set_item(Some(id.clone()));
                }
            }
            ServerEvent::AudioDelta { item_id, delta, .. } => {
                self.handle_audio_delta(item_id.as_deref(), delta);
            }
            ServerEvent::AudioTranscriptDelta { delta, .. } => {
                if !self.response.interrupted {
                    self.transcript.push(delta);
                }
            }
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                if !self.response.interrupted && self.transcript.is_blank() {
                    self.transcript.push(transcript);
                }
            }
            ServerEvent::ResponseDone { response } => {
                self.handle_response_done(response.status.as_deref());
            }
            ServerEvent::ConversationItemTruncated {
                item_id,
                audio_end_ms,
            } => {
                debug!(item_id, ?audio_end_ms, "Upstream truncated item");
            }
            ServerEvent::Error { error } => {
                warn!(message = error.message(), "Bridge reported an error");
            }
            ServerEvent::ConnectionEstablished { .. }
            | ServerEvent::SessionCreated { .. }
            | ServerEvent::SessionUpdated { .. }
            | ServerEvent::AudioDone { .. }
            | ServerEvent::Other => {}
        }
    }

    fn handle_audio_delta(&mut self, item_id: Option<&str>, delta: &str) {
        if self.response.interrupted {
            trace!("Dropping audio for interrupted response");
            return;
        }
        let pcm = match codec::from_transport(delta) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(error = %e, "Dropping malformed audio delta");
                return;
            }
        };
        if self.response.item_id.is_none()
            && let Some(id) = item_id
        {
            self.response.set_item(id);
        }
        if self.scheduler.enqueue(&pcm, &mut self.response).is_some() {
            self.set_state(TurnState::Speaking);
        }
    }

    fn handle_response_done(&mut self, status: Option<&str>) {
        let cancelled = self.response.interrupted || status == Some("cancelled");
        if let Some(message) = self.transcript.take(cancelled) {
            self.sink.emit(message);
        }
        self.response.complete_response();
        debug!(?status, "Response done");

        if !self.response.speaking && self.state == TurnState::AwaitingResponse {
            self.set_state(TurnState::Idle);
        }
    }

    // =========================================================================
    // Playback clock
    // =========================================================================

    /// Advance against the output clock. Returns `true` when scheduled
    /// response audio finished playing.
    pub fn tick(&mut self) -> bool {
        if self.closed || !self.scheduler.poll_completion(&mut self.response) {
            return false;
        }
        if self.state == TurnState::Speaking {
            let next = if self.response.active {
                // drained before the response finished streaming
                TurnState::AwaitingResponse
            } else {
                TurnState::Idle
            };
            self.set_state(next);
        }
        true
    }

    /// Release playback and forget everything in flight. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.scheduler.close(&mut self.response);
        self.response.reset();
        self.transcript.discard();
        self.state = TurnState::Idle;
        debug!("Turn controller shut down");
    }
}
