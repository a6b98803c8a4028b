use std::path::PathBuf;

use super::env::{self, parse_transcription_model, parse_voice};
use super::yaml::YamlConfig;
use super::ServerConfig;
use crate::errors::ConfigResult;

/// Build the final configuration: environment (over defaults) first, then
/// any YAML values on top.
pub(super) fn merge_config(yaml: Option<YamlConfig>) -> ConfigResult<ServerConfig> {
    let mut config = env::from_env()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
    }

    if let Some(upstream) = yaml.upstream {
        if let Some(url) = upstream.url {
            config.upstream_url = url;
        }
        if let Some(model) = upstream.model {
            config.upstream_model = model;
        }
        if let Some(api_key) = upstream.api_key {
            config.openai_api_key = Some(api_key);
        }
        if let Some(model) = upstream.transcription_model {
            config.transcription_model = parse_transcription_model(model);
        }
    }

    if let Some(session) = yaml.session {
        if let Some(voice) = session.default_voice {
            config.default_voice = parse_voice("session.default_voice", &voice)?;
        }
        if let Some(temperature) = session.default_temperature {
            config.default_temperature = temperature;
        }
        if let Some(path) = session.instructions_template_path {
            config.instructions_template_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = session.idle_timeout_secs {
            config.idle_timeout_secs = secs;
        }
    }

    if let Some(security) = yaml.security {
        if let Some(origins) = security.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
        if let Some(max) = security.max_websocket_connections {
            config.max_websocket_connections = Some(max);
        }
        if let Some(limit) = security.max_connections_per_ip {
            config.max_connections_per_ip = limit;
        }
    }

    Ok(config)
}
