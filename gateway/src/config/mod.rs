//! Configuration module for the voice bridge server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voicebridge_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::realtime::{
    DEFAULT_REALTIME_MODEL, DEFAULT_TEMPERATURE, DEFAULT_TRANSCRIPTION_MODEL, RealtimeVoice,
    SessionDefaults, UPSTREAM_REALTIME_URL, upstream_url,
};
use crate::errors::ConfigResult;

/// Default idle time before a bridged session is closed.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default per-IP WebSocket connection limit.
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// API key sent to the upstream realtime endpoint
    pub openai_api_key: Option<String>,
    /// Upstream realtime WebSocket base URL (model is appended)
    pub upstream_url: String,
    pub upstream_model: String,

    /// Voice used when a client supplies none
    pub default_voice: RealtimeVoice,
    /// Temperature used when a client supplies none
    pub default_temperature: f32,
    /// User-audio transcription model; `None` disables transcription
    pub transcription_model: Option<String>,
    /// Instruction template file; the built-in template is used when unset
    pub instructions_template_path: Option<PathBuf>,

    /// Seconds without client traffic before a session is closed
    pub idle_timeout_secs: u64,

    // Security settings
    /// Comma-separated list of allowed CORS origins, or "*" for any
    pub cors_allowed_origins: Option<String>,
    /// Maximum concurrent WebSocket connections (None means unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum WebSocket connections from a single IP address
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            openai_api_key: None,
            upstream_url: UPSTREAM_REALTIME_URL.to_string(),
            upstream_model: DEFAULT_REALTIME_MODEL.to_string(),
            default_voice: RealtimeVoice::default(),
            default_temperature: DEFAULT_TEMPERATURE,
            transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            instructions_template_path: None,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            cors_allowed_origins: None,
            max_websocket_connections: None,
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
        }
    }
}

/// Zeroize the upstream API key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// The .env file is loaded in main.rs at startup, so its values are
    /// visible here as environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full upstream URL including the model query parameter.
    pub fn upstream_endpoint(&self) -> String {
        upstream_url(&self.upstream_url, &self.upstream_model)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Session defaults before any per-connection overrides.
    pub fn session_defaults(&self) -> SessionDefaults {
        SessionDefaults {
            voice: self.default_voice,
            temperature: self.default_temperature,
            transcription_model: self.transcription_model.clone(),
        }
    }
}
