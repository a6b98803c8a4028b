use super::ServerConfig;
use crate::core::realtime::{MAX_TEMPERATURE, MIN_TEMPERATURE};
use crate::errors::{ConfigError, ConfigResult};

/// Validate a merged configuration.
pub(super) fn validate(config: &ServerConfig) -> ConfigResult<()> {
    validate_upstream_url(&config.upstream_url)?;
    validate_temperature(config.default_temperature)?;
    validate_template_path(config)?;
    validate_limits(config)?;

    if config.upstream_model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "upstream_model must not be empty".to_string(),
        ));
    }
    if config.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "idle_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_upstream_url(url: &str) -> ConfigResult<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| ConfigError::Validation(format!("upstream_url '{url}' is invalid: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        scheme => Err(ConfigError::Validation(format!(
            "upstream_url must use ws:// or wss://, got {scheme}://"
        ))),
    }
}

fn validate_temperature(temperature: f32) -> ConfigResult<()> {
    if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature) {
        return Err(ConfigError::Validation(format!(
            "default_temperature must be within [{MIN_TEMPERATURE}, {MAX_TEMPERATURE}], got {temperature}"
        )));
    }
    Ok(())
}

fn validate_template_path(config: &ServerConfig) -> ConfigResult<()> {
    if let Some(path) = &config.instructions_template_path
        && !path.is_file()
    {
        return Err(ConfigError::Validation(format!(
            "instructions_template_path {} does not exist",
            path.display()
        )));
    }
    Ok(())
}

fn validate_limits(config: &ServerConfig) -> ConfigResult<()> {
    if config.max_connections_per_ip == 0 {
        return Err(ConfigError::Validation(
            "max_connections_per_ip must be greater than zero".to_string(),
        ));
    }
    if config.max_websocket_connections == Some(0) {
        return Err(ConfigError::Validation(
            "max_websocket_connections must be greater than zero when set".to_string(),
        ));
    }
    Ok(())
}
