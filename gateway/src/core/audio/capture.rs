//! Microphone capture buffering.
//!
//! The input device delivers fixed-size frames at its own cadence (a 4096-sample
//! block at 24 kHz arrives roughly every 170 ms). Network cadence is tuned
//! independently: frames are queued and a single consumer task flushes the queue
//! as one `input_audio_buffer.append` event after [`CaptureConfig::flush_interval`].
//!
//! ```text
//! device callback --try_send--> [bounded channel] --> pump task --> EventTransport
//!                                                     (lazy timer)
//! ```

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep};
use tracing::{debug, trace, warn};

use super::codec::{self, BYTES_PER_SAMPLE};
use crate::core::realtime::ClientEvent;
use crate::core::transport::EventTransport;

/// Default delay between the first queued frame and the flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of frames the device side may queue ahead of the pump.
pub const DEFAULT_FRAME_CAPACITY: usize = 64;

/// Capture tuning.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub flush_interval: Duration,
    pub frame_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
        }
    }
}

/// A fixed block of mono PCM16 samples produced by one device callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame(Bytes);

impl AudioFrame {
    /// Encode device float samples into a frame.
    pub fn from_samples(samples: &[f32]) -> Self {
        Self(Bytes::from(codec::encode_frame(samples)))
    }

    /// Wrap bytes that are already PCM16 little-endian.
    pub fn from_pcm16(bytes: Bytes) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn sample_count(&self) -> usize {
        self.0.len() / BYTES_PER_SAMPLE
    }
}

/// Result of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Queued audio was sent as one append event
    Sent { bytes: usize },
    /// Nothing was queued
    Empty,
    /// The transport was closed; queued audio was discarded
    Dropped { bytes: usize },
}

/// Frame queue flushed as a single append message.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    frames: Vec<AudioFrame>,
    queued_bytes: usize,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame. Returns `true` when the queue was empty, meaning a
    /// flush timer has to be armed.
    pub fn push(&mut self, frame: AudioFrame) -> bool {
        let was_empty = self.frames.is_empty();
        self.queued_bytes += frame.as_bytes().len();
        self.frames.push(frame);
        was_empty
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Concatenate queued frames and send them. Never fails: a closed
    /// transport drops the audio.
    pub fn flush(&mut self, transport: &dyn EventTransport) -> FlushOutcome {
        if self.frames.is_empty() {
            return FlushOutcome::Empty;
        }

        let mut joined = BytesMut::with_capacity(self.queued_bytes);
        for frame in self.frames.drain(..) {
            joined.extend_from_slice(frame.as_bytes());
        }
        let bytes = std::mem::take(&mut self.queued_bytes);

        if !transport.is_open() {
            debug!(bytes, "Transport closed, dropping captured audio");
            return FlushOutcome::Dropped { bytes };
        }

        let event = ClientEvent::InputAudioBufferAppend {
            audio: codec::to_transport(&joined),
        };
        match transport.send(event) {
            Ok(()) => {
                trace!(bytes, "Flushed captured audio");
                FlushOutcome::Sent { bytes }
            }
            Err(_) => {
                debug!(bytes, "Transport closed during flush, dropping captured audio");
                FlushOutcome::Dropped { bytes }
            }
        }
    }
}

enum CaptureCommand {
    Frame(AudioFrame),
    Flush(oneshot::Sender<FlushOutcome>),
}

/// Cheap handle the device callback uses to hand frames to the pump.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<CaptureCommand>,
}

impl FrameSender {
    /// Queue a frame without blocking the device thread. Returns `false` if
    /// the frame was dropped because the pump is gone or lagging.
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.tx.try_send(CaptureCommand::Frame(frame)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Capture queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Encode and queue device samples.
    pub fn push_samples(&self, samples: &[f32]) -> bool {
        self.push(AudioFrame::from_samples(samples))
    }
}

/// Owns the capture pump task.
///
/// Dropping the handle aborts the pump; call [`CaptureHandle::stop`] to flush
/// any partial buffer first.
pub struct CaptureHandle {
    tx: mpsc::Sender<CaptureCommand>,
    task: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Spawn the pump task on the current runtime.
    pub fn spawn(transport: Arc<dyn EventTransport>, config: CaptureConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.frame_capacity.max(1));
        let task = tokio::spawn(run_pump(rx, transport, config.flush_interval));
        Self {
            tx,
            task: Some(task),
        }
    }

    pub fn frame_sender(&self) -> FrameSender {
        FrameSender {
            tx: self.tx.clone(),
        }
    }

    /// Flush immediately, e.g. when capture stops.
    pub async fn flush(&self) -> FlushOutcome {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(CaptureCommand::Flush(ack_tx)).await.is_err() {
            return FlushOutcome::Empty;
        }
        ack_rx.await.unwrap_or(FlushOutcome::Empty)
    }

    /// Flush the partial buffer and end the pump.
    pub async fn stop(mut self) -> FlushOutcome {
        let outcome = self.flush().await;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        outcome
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn wait_deadline(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(deadline) => deadline.as_mut().await,
        None => pending().await,
    }
}

async fn run_pump(
    mut rx: mpsc::Receiver<CaptureCommand>,
    transport: Arc<dyn EventTransport>,
    flush_interval: Duration,
) {
    let mut buffer = CaptureBuffer::new();
    let mut timer: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(CaptureCommand::Frame(frame)) => {
                    if buffer.push(frame) {
                        timer = Some(Box::pin(sleep(flush_interval)));
                    }
                }
                Some(CaptureCommand::Flush(ack)) => {
                    timer = None;
                    let _ = ack.send(buffer.flush(transport.as_ref()));
                }
                None => {
                    buffer.flush(transport.as_ref());
                    break;
                }
            },
            _ = wait_deadline(&mut timer) => {
                timer = None;
                buffer.flush(transport.as_ref());
            }
        }
    }

    debug!("Capture pump ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::testing::RecordingTransport;

    fn append_payload(event: &ClientEvent) -> Vec<u8> {
        match event {
            ClientEvent::InputAudioBufferAppend { audio } => codec::from_transport(audio).unwrap(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_buffer_concatenates_frames_in_order() {
        let transport = RecordingTransport::default();
        let mut buffer = CaptureBuffer::new();

        assert!(buffer.push(AudioFrame::from_pcm16(Bytes::from_static(&[1, 2]))));
        assert!(!buffer.push(AudioFrame::from_pcm16(Bytes::from_static(&[3, 4, 5, 6]))));
        assert_eq!(buffer.queued_bytes(), 6);

        assert_eq!(buffer.flush(&transport), FlushOutcome::Sent { bytes: 6 });
        assert!(buffer.is_empty());

        let events = transport.take();
        assert_eq!(events.len(), 1);
        assert_eq!(append_payload(&events[0]), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_flush_empty_sends_nothing() {
        let transport = RecordingTransport::default();
        let mut buffer = CaptureBuffer::new();
        assert_eq!(buffer.flush(&transport), FlushOutcome::Empty);
        assert!(transport.take().is_empty());
    }

    #[test]
    fn test_flush_on_closed_transport_drops_silently() {
        let transport = RecordingTransport::default();
        transport.close();
        let mut buffer = CaptureBuffer::new();
        buffer.push(AudioFrame::from_samples(&[0.1; 8]));

        assert_eq!(buffer.flush(&transport), FlushOutcome::Dropped { bytes: 16 });
        assert!(buffer.is_empty());
        // the next push must arm a fresh timer
        assert!(buffer.push(AudioFrame::from_samples(&[0.1; 8])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_flushes_once_after_interval() {
        let transport = Arc::new(RecordingTransport::default());
        let handle = CaptureHandle::spawn(transport.clone(), CaptureConfig::default());
        let frames = handle.frame_sender();

        for _ in 0..3 {
            assert!(frames.push_samples(&[0.5; 480]));
        }

        sleep(Duration::from_millis(50)).await;
        assert!(transport.events.lock().is_empty(), "nothing sent before timer");

        sleep(Duration::from_millis(60)).await;
        let events = transport.take();
        assert_eq!(events.len(), 1);
        assert_eq!(append_payload(&events[0]).len(), 3 * 480 * 2);

        // timer is cleared after a flush: no further sends without new frames
        sleep(Duration::from_millis(500)).await;
        assert!(transport.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_after_flush_rearm_timer() {
        let transport = Arc::new(RecordingTransport::default());
        let handle = CaptureHandle::spawn(transport.clone(), CaptureConfig::default());
        let frames = handle.frame_sender();

        frames.push_samples(&[0.1; 240]);
        sleep(Duration::from_millis(120)).await;
        frames.push_samples(&[0.2; 240]);
        frames.push_samples(&[0.3; 240]);
        sleep(Duration::from_millis(120)).await;

        let events = transport.take();
        assert_eq!(events.len(), 2);
        assert_eq!(append_payload(&events[0]).len(), 480);
        assert_eq!(append_payload(&events[1]).len(), 960);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flushes_partial_buffer() {
        let transport = Arc::new(RecordingTransport::default());
        let handle = CaptureHandle::spawn(transport.clone(), CaptureConfig::default());
        handle.frame_sender().push_samples(&[0.4; 100]);

        let outcome = handle.stop().await;
        assert_eq!(outcome, FlushOutcome::Sent { bytes: 200 });
        assert_eq!(transport.take().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_survives_closed_transport() {
        let transport = Arc::new(RecordingTransport::default());
        transport.close();
        let handle = CaptureHandle::spawn(transport.clone(), CaptureConfig::default());
        handle.frame_sender().push_samples(&[0.4; 100]);

        sleep(Duration::from_millis(150)).await;
        assert_eq!(handle.flush().await, FlushOutcome::Empty);
        assert!(transport.take().is_empty());
    }
}
