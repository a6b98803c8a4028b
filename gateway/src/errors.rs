//! Error types for the bridge server and its configuration.

use thiserror::Error;

use crate::core::realtime::TemplateError;

/// Session proxy errors.
///
/// Transport errors end the session; the others are reported to the client
/// as `error` events and the session continues.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Upstream connection failed: {0}")]
    UpstreamConnect(String),

    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("Client transport error: {0}")]
    ClientTransport(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Failed to build session configuration: {0}")]
    SessionConfig(#[from] TemplateError),

    #[error("Connection closed due to inactivity")]
    IdleTimeout,
}

impl BridgeError {
    /// Machine-readable code sent in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::UpstreamConnect(_) => "upstream_connect_failed",
            BridgeError::UpstreamTransport(_) => "upstream_error",
            BridgeError::ClientTransport(_) => "websocket_error",
            BridgeError::InvalidMessage(_) => "parse_error",
            BridgeError::SessionConfig(_) => "session_config_error",
            BridgeError::IdleTimeout => "idle_timeout",
        }
    }

    /// Whether the session can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidMessage(_) | BridgeError::SessionConfig(_)
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::InvalidMessage(e.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
