use serde::Deserialize;
use std::path::Path;

use crate::errors::{ConfigError, ConfigResult};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// upstream:
///   url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   api_key: "sk-..."
///   transcription_model: "whisper-1"
///
/// session:
///   default_voice: "alloy"
///   default_temperature: 0.8
///   instructions_template_path: "/etc/voicebridge/instructions.txt"
///   idle_timeout_secs: 300
///
/// security:
///   cors_allowed_origins: "https://app.example.com"
///   max_websocket_connections: 1000
///   max_connections_per_ip: 20
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub upstream: Option<UpstreamYaml>,
    pub session: Option<SessionYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Upstream realtime endpoint from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpstreamYaml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// Model used to transcribe user audio; "none" disables transcription
    pub transcription_model: Option<String>,
}

/// Session defaults from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub default_voice: Option<String>,
    pub default_temperature: Option<f32>,
    pub instructions_template_path: Option<String>,
    pub idle_timeout_secs: Option<u64>,
}

/// Security settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080

upstream:
  url: "ws://localhost:9000/v1/realtime"
  model: "test-model"
  api_key: "sk-yaml"
  transcription_model: "none"

session:
  default_voice: "verse"
  default_temperature: 1.0
  instructions_template_path: "/tmp/instructions.txt"
  idle_timeout_secs: 120

security:
  cors_allowed_origins: "*"
  max_websocket_connections: 10
  max_connections_per_ip: 2
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.as_ref().unwrap();
        assert_eq!(server.host, Some("127.0.0.1".to_string()));
        assert_eq!(server.port, Some(8080));

        let upstream = config.upstream.as_ref().unwrap();
        assert_eq!(
            upstream.url,
            Some("ws://localhost:9000/v1/realtime".to_string())
        );
        assert_eq!(upstream.api_key, Some("sk-yaml".to_string()));
        assert_eq!(upstream.transcription_model, Some("none".to_string()));

        let session = config.session.as_ref().unwrap();
        assert_eq!(session.default_voice, Some("verse".to_string()));
        assert_eq!(session.default_temperature, Some(1.0));
        assert_eq!(session.idle_timeout_secs, Some(120));

        let security = config.security.as_ref().unwrap();
        assert_eq!(security.max_websocket_connections, Some(10));
        assert_eq!(security.max_connections_per_ip, Some(2));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
server:
  port: 4000
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.as_ref().unwrap().port, Some(4000));
        assert!(config.server.as_ref().unwrap().host.is_none());
        assert!(config.upstream.is_none());
        assert!(config.session.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.security.is_none());
    }

    #[test]
    fn test_from_file_not_found() {
        let path = Path::new("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
