//! Per-connection session state.
//!
//! One [`Session`] exists per client socket. It is owned by the relay loop and
//! never shared, so transitions are plain `&mut self` methods.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::audio::codec::pcm16_duration_ms;
use crate::core::realtime::{
    ClientEvent, InstructionTemplate, RealtimeVoice, ScenarioParameters, ServerEvent,
    SessionDefaults, TemplateError, build_session_config,
};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upstream connection in progress
    Connecting,
    /// Both legs open, relaying
    Open,
    /// One leg closed, tearing down the other
    Closing,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Server-side bookkeeping of the upstream response lifecycle.
///
/// The client owns the authoritative play position; this only records what
/// the upstream has produced, so a second `response.create` while one is in
/// flight can be detected and later reconciled.
#[derive(Debug, Default)]
pub struct ResponseTracker {
    active: bool,
    response_id: Option<String>,
    item_id: Option<String>,
    /// Audio streamed to the client for the current response
    streamed_audio_ms: f64,
    double_active: bool,
}

impl ResponseTracker {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_double_active(&self) -> bool {
        self.double_active
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn item_id(&self) -> Option<&str> {
        self.item_id.as_deref()
    }

    pub fn streamed_audio_ms(&self) -> f64 {
        self.streamed_audio_ms
    }

    /// Client asked for a response.
    pub fn on_client_create(&mut self) {
        if self.active {
            warn!(
                response_id = ?self.response_id,
                "response.create while a response is active"
            );
            self.double_active = true;
        }
    }

    /// Client cancelled; local play-state bookkeeping is cleared.
    pub fn on_client_cancel(&mut self) {
        if self.double_active {
            info!("Double-active response state reconciled by cancel");
        }
        self.clear();
    }

    pub fn on_upstream_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::ResponseCreated { response } => {
                if self.active {
                    warn!(
                        previous = ?self.response_id,
                        next = ?response.id,
                        "Upstream started a response while another is active"
                    );
                    self.double_active = true;
                }
                self.active = true;
                self.response_id = response.id.clone();
                self.item_id = None;
                self.streamed_audio_ms = 0.0;
            }
            ServerEvent::OutputItemAdded { item, .. } => {
                if item.id != self.item_id {
                    self.streamed_audio_ms = 0.0;
                }
                self.item_id = item.id.clone();
            }
            ServerEvent::AudioDelta { item_id, delta, .. } => {
                if item_id.is_some() && *item_id != self.item_id {
                    self.item_id = item_id.clone();
                    self.streamed_audio_ms = 0.0;
                }
                self.streamed_audio_ms += pcm16_duration_ms(base64_decoded_len(delta));
            }
            ServerEvent::ResponseDone { response } => {
                if self.double_active {
                    info!(
                        response_id = ?response.id,
                        "Double-active response state reconciled by response.done"
                    );
                    self.double_active = false;
                    if response.id.is_some() && response.id != self.response_id {
                        // An earlier response finished; the latest stays active
                        return;
                    }
                }
                debug!(
                    response_id = ?response.id,
                    status = ?response.status,
                    streamed_ms = self.streamed_audio_ms,
                    "Response finished"
                );
                self.clear();
            }
            ServerEvent::ConversationItemTruncated {
                item_id,
                audio_end_ms,
            } => {
                debug!(item_id = %item_id, audio_end_ms = ?audio_end_ms, "Item truncated upstream");
            }
            _ => {}
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Decoded size of padded base64 text, without decoding it.
fn base64_decoded_len(text: &str) -> usize {
    let padding = text.bytes().rev().take_while(|b| *b == b'=').count();
    (text.len() / 4 * 3).saturating_sub(padding)
}

/// One bridged conversation.
#[derive(Debug)]
pub struct Session {
    id: String,
    state: SessionState,
    /// Current voice and temperature; later updates fall back to these
    settings: SessionDefaults,
    parameters: Option<ScenarioParameters>,
    responses: ResponseTracker,
}

impl Session {
    /// New session in the `Connecting` state with a fresh id.
    pub fn new(settings: SessionDefaults) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: SessionState::Connecting,
            settings,
            parameters: None,
            responses: ResponseTracker::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn voice(&self) -> RealtimeVoice {
        self.settings.voice
    }

    pub fn temperature(&self) -> f32 {
        self.settings.temperature
    }

    pub fn parameters(&self) -> Option<&ScenarioParameters> {
        self.parameters.as_ref()
    }

    pub fn responses(&self) -> &ResponseTracker {
        &self.responses
    }

    pub fn responses_mut(&mut self) -> &mut ResponseTracker {
        &mut self.responses
    }

    /// Upstream is open.
    pub fn open(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Open;
        }
    }

    /// Start teardown. Returns false if teardown already started.
    pub fn begin_close(&mut self) -> bool {
        match self.state {
            SessionState::Connecting | SessionState::Open => {
                self.state = SessionState::Closing;
                true
            }
            SessionState::Closing | SessionState::Closed => false,
        }
    }

    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
    }

    /// `session.update` sent once upstream opens, from the connection's
    /// voice and temperature.
    pub fn initial_update(
        &self,
        template: &dyn InstructionTemplate,
    ) -> Result<ClientEvent, TemplateError> {
        let session = build_session_config(&ScenarioParameters::default(), &self.settings, template)?;
        Ok(ClientEvent::SessionUpdate {
            session: Some(session),
            parameters: None,
        })
    }

    /// Replace client-supplied scenario parameters with a generated
    /// `session.update` and adopt the resulting voice and temperature.
    pub fn apply_parameters(
        &mut self,
        params: ScenarioParameters,
        template: &dyn InstructionTemplate,
    ) -> Result<ClientEvent, TemplateError> {
        let session = build_session_config(&params, &self.settings, template)?;

        if let Some(voice) = session.voice.as_deref().and_then(RealtimeVoice::parse) {
            self.settings.voice = voice;
        }
        if let Some(temperature) = session.temperature {
            self.settings.temperature = temperature;
        }
        self.parameters = Some(params);

        Ok(ClientEvent::SessionUpdate {
            session: Some(session),
            parameters: None,
        })
    }
}
