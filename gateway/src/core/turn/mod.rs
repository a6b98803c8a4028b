//! Turn-taking: who is talking, what was heard, and what was said.

pub mod controller;
pub mod response;
pub mod transcript;

pub use controller::{CaptureStart, Interruption, TurnController, TurnMode, TurnState};
pub use response::ResponseState;
pub use transcript::{
    Role, TracingSink, TranscriptAccumulator, TranscriptMessage, TranscriptSink,
};
