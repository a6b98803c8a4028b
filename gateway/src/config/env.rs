use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::ServerConfig;
use crate::core::realtime::RealtimeVoice;
use crate::errors::{ConfigError, ConfigResult};

/// Every environment variable the server reads.
pub(super) const ENV_KEYS: &[&str] = &[
    "HOST",
    "PORT",
    "OPENAI_API_KEY",
    "UPSTREAM_URL",
    "UPSTREAM_MODEL",
    "DEFAULT_VOICE",
    "DEFAULT_TEMPERATURE",
    "TRANSCRIPTION_MODEL",
    "INSTRUCTIONS_TEMPLATE_PATH",
    "IDLE_TIMEOUT_SECS",
    "CORS_ALLOWED_ORIGINS",
    "MAX_WEBSOCKET_CONNECTIONS",
    "MAX_CONNECTIONS_PER_IP",
];

/// Non-empty value of an environment variable.
fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse<T: FromStr>(key: &'static str) -> ConfigResult<Option<T>> {
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(None),
    }
}

/// Parse a voice id; only upstream voice ids are accepted as defaults.
pub(super) fn parse_voice(key: &'static str, value: &str) -> ConfigResult<RealtimeVoice> {
    RealtimeVoice::parse(value).ok_or_else(|| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

/// `none` (any case) disables transcription.
pub(super) fn parse_transcription_model(value: String) -> Option<String> {
    if value.trim().eq_ignore_ascii_case("none") {
        None
    } else {
        Some(value)
    }
}

/// Configuration from environment variables on top of defaults.
pub(super) fn from_env() -> ConfigResult<ServerConfig> {
    let mut config = ServerConfig::default();

    if let Some(host) = var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse("PORT")? {
        config.port = port;
    }

    config.openai_api_key = var("OPENAI_API_KEY");
    if let Some(url) = var("UPSTREAM_URL") {
        config.upstream_url = url;
    }
    if let Some(model) = var("UPSTREAM_MODEL") {
        config.upstream_model = model;
    }

    if let Some(voice) = var("DEFAULT_VOICE") {
        config.default_voice = parse_voice("DEFAULT_VOICE", &voice)?;
    }
    if let Some(temperature) = parse("DEFAULT_TEMPERATURE")? {
        config.default_temperature = temperature;
    }
    if let Some(model) = var("TRANSCRIPTION_MODEL") {
        config.transcription_model = parse_transcription_model(model);
    }
    config.instructions_template_path = var("INSTRUCTIONS_TEMPLATE_PATH").map(PathBuf::from);

    if let Some(secs) = parse("IDLE_TIMEOUT_SECS")? {
        config.idle_timeout_secs = secs;
    }
    config.cors_allowed_origins = var("CORS_ALLOWED_ORIGINS");
    config.max_websocket_connections = parse("MAX_WEBSOCKET_CONNECTIONS")?;
    if let Some(limit) = parse("MAX_CONNECTIONS_PER_IP")? {
        config.max_connections_per_ip = limit;
    }

    Ok(config)
}
