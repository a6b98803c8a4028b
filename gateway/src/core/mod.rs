pub mod audio;
pub mod realtime;
pub mod transport;
pub mod turn;

// Re-export commonly used types for convenience
pub use audio::{AudioFrame, AudioOutput, CaptureConfig, CaptureHandle, PlaybackScheduler};
pub use realtime::{ClientEvent, ScenarioParameters, ServerEvent, SessionConfig};
pub use transport::{EventTransport, TransportClosed};
pub use turn::{ResponseState, TurnController, TurnMode, TurnState};
