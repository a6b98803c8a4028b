//! Client leg of the bridge.
//!
//! Connects to a running bridge, drives capture, playback and turn-taking for
//! one conversation, and reads/writes WAV files for the `converse` command.
//!
//! # Example
//!
//! ```rust,ignore
//! use voicebridge_gateway::client::{
//!     BridgeConnection, Conversation, ConversationConfig, WavOutput, bridge_url,
//! };
//! use voicebridge_gateway::core::turn::TracingSink;
//!
//! let url = bridge_url("ws://127.0.0.1:3001/realtime", Some("AndrewNeural"), None)?;
//! let connection = BridgeConnection::connect(url.as_str()).await?;
//! let output = WavOutput::create("reply.wav");
//! let mut conversation =
//!     Conversation::new(connection, output, Box::new(TracingSink), ConversationConfig::default());
//! conversation.send_text("Hello there")?;
//! conversation.wait_until_idle().await?;
//! conversation.shutdown().await;
//! ```

pub mod connection;
pub mod conversation;
pub mod wav;

use thiserror::Error;

use crate::core::transport::TransportClosed;

pub use connection::{BridgeConnection, bridge_url};
pub use conversation::{Conversation, ConversationConfig};
pub use wav::{WavOutput, read_wav_samples};

/// Client-side errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to bridge: {0}")]
    Connect(String),

    #[error("Bridge rejected the session: {0}")]
    Rejected(String),

    #[error("Connection to bridge closed")]
    Closed,

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Invalid bridge URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported WAV input: {0}")]
    UnsupportedWav(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl From<TransportClosed> for ClientError {
    fn from(_: TransportClosed) -> Self {
        ClientError::Closed
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
