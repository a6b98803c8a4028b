//! Conversation driver.
//!
//! Ties one [`BridgeConnection`] to capture, playback and the turn controller.
//! All controller transitions happen on the task that owns the
//! [`Conversation`]; the only suspension points are the connection, the
//! playback tick and capture flushes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tracing::{debug, info};

use super::connection::BridgeConnection;
use super::{ClientError, ClientResult};
use crate::core::audio::codec::samples_duration_secs;
use crate::core::audio::{AudioOutput, CaptureConfig, CaptureHandle, FrameSender};
use crate::core::realtime::{ClientEvent, ScenarioParameters};
use crate::core::transport::EventTransport;
use crate::core::turn::{CaptureStart, TranscriptSink, TurnController, TurnMode, TurnState};

/// Samples per simulated device callback
pub const DEFAULT_FRAME_SAMPLES: usize = 4096;

/// Conversation tuning.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub mode: TurnMode,
    pub capture: CaptureConfig,
    /// How often the playback clock is polled
    pub tick_interval: Duration,
    /// Limit for [`Conversation::wait_until_idle`]
    pub response_timeout: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            mode: TurnMode::Manual,
            capture: CaptureConfig::default(),
            tick_interval: Duration::from_millis(20),
            response_timeout: Duration::from_secs(60),
        }
    }
}

/// One conversation over an established bridge connection.
pub struct Conversation<O: AudioOutput> {
    connection: BridgeConnection,
    transport: Arc<dyn EventTransport>,
    controller: TurnController<O>,
    capture: Option<CaptureHandle>,
    config: ConversationConfig,
    connection_open: bool,
}

impl<O: AudioOutput> Conversation<O> {
    pub fn new(
        connection: BridgeConnection,
        output: O,
        sink: Box<dyn TranscriptSink>,
        config: ConversationConfig,
    ) -> Self {
        let transport = connection.transport();
        let controller = TurnController::new(transport.clone(), output, sink, config.mode);
        Self {
            connection,
            transport,
            controller,
            capture: None,
            config,
            connection_open: true,
        }
    }

    pub fn session_id(&self) -> &str {
        self.connection.session_id()
    }

    pub fn controller(&self) -> &TurnController<O> {
        &self.controller
    }

    pub fn state(&self) -> TurnState {
        self.controller.state()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Send scenario parameters; the bridge turns them into a session update.
    pub fn configure(&mut self, parameters: ScenarioParameters) -> ClientResult<()> {
        self.connection.send(ClientEvent::SessionUpdate {
            session: None,
            parameters: Some(parameters),
        })
    }

    /// Start listening, interrupting the agent if it is speaking.
    ///
    /// Cancel and truncate are queued and playback is reset before the
    /// capture pump starts.
    pub fn start_capture(&mut self) -> ClientResult<FrameSender> {
        let start = self.controller.request_capture()?;
        if let CaptureStart::Interrupted(interruption) = &start {
            info!(
                cancelled = interruption.cancelled,
                truncated_at_ms = ?interruption.truncated_at_ms,
                "Barge-in"
            );
        }

        let transport = &self.transport;
        let capture_config = &self.config.capture;
        let capture = self
            .capture
            .get_or_insert_with(|| CaptureHandle::spawn(transport.clone(), capture_config.clone()));
        Ok(capture.frame_sender())
    }

    /// Stop listening. Queued audio is flushed before the turn ends.
    pub async fn stop_capture(&mut self) -> bool {
        if let Some(capture) = self.capture.take() {
            let outcome = capture.stop().await;
            debug!(?outcome, "Capture stopped");
        }
        self.controller.stop_capture()
    }

    /// Send a typed message and request a reply.
    pub fn send_text(&mut self, text: &str) -> ClientResult<()> {
        Ok(self.controller.send_text(text)?)
    }

    /// Feed samples as a microphone would, in real time, while handling
    /// bridge events. Capture must be started.
    pub async fn stream_samples(
        &mut self,
        samples: &[f32],
        frame_samples: usize,
    ) -> ClientResult<()> {
        let frames = self
            .capture
            .as_ref()
            .map(CaptureHandle::frame_sender)
            .ok_or(ClientError::Closed)?;

        for chunk in samples.chunks(frame_samples.max(1)) {
            frames.push_samples(chunk);
            let frame_duration = Duration::from_secs_f64(samples_duration_secs(chunk.len()));
            self.pump_until(Instant::now() + frame_duration).await?;
        }
        Ok(())
    }

    /// Handle events and playback until the turn is over.
    pub async fn wait_until_idle(&mut self) -> ClientResult<()> {
        let deadline = Instant::now() + self.config.response_timeout;
        while self.controller.state() != TurnState::Idle {
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout("the response to finish"));
            }
            let step = (Instant::now() + self.config.tick_interval).min(deadline);
            self.pump_until(step).await?;
        }
        Ok(())
    }

    /// Handle bridge events and advance playback until `deadline`.
    pub async fn pump_until(&mut self, deadline: Instant) -> ClientResult<()> {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.connection.next_event(), if self.connection_open => {
                    match event {
                        Some(event) => self.controller.handle_server_event(&event),
                        None => {
                            self.connection_open = false;
                            return Err(ClientError::Closed);
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.controller.tick();
                }
                _ = sleep_until(deadline) => return Ok(()),
            }
        }
    }

    /// Stop capture, release playback and close the connection.
    pub async fn shutdown(mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop().await;
        }
        self.controller.shutdown();
        self.connection.close().await;
        info!("Conversation closed");
    }
}
