//! Upstream realtime connection.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::core::realtime::ClientEvent;
use crate::errors::{BridgeError, BridgeResult};

/// WebSocket to the upstream realtime endpoint.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Maximum time allowed for the upstream handshake
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the upstream handshake request.
///
/// The bearer token is only attached when an API key is configured, which
/// lets the bridge run against local endpoints that need none.
pub fn build_upstream_request(config: &ServerConfig) -> BridgeResult<http::Request<()>> {
    let url = config.upstream_endpoint();
    let uri: http::Uri = url
        .parse()
        .map_err(|e| BridgeError::UpstreamConnect(format!("invalid upstream url {url}: {e}")))?;
    let host = uri
        .authority()
        .map(|authority| authority.as_str().to_string())
        .ok_or_else(|| BridgeError::UpstreamConnect(format!("upstream url {url} has no host")))?;

    let mut builder = http::Request::builder()
        .uri(uri)
        .header("OpenAI-Beta", "realtime=v1")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host);

    if let Some(api_key) = &config.openai_api_key {
        builder = builder.header("Authorization", format!("Bearer {api_key}"));
    }

    builder
        .body(())
        .map_err(|e| BridgeError::UpstreamConnect(e.to_string()))
}

/// Open the upstream WebSocket.
pub async fn connect_upstream(config: &ServerConfig) -> BridgeResult<UpstreamSocket> {
    let request = build_upstream_request(config)?;
    debug!(uri = %request.uri(), "Connecting to upstream realtime endpoint");

    let (socket, response) =
        tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| {
                BridgeError::UpstreamConnect(format!(
                    "timed out after {}s",
                    UPSTREAM_CONNECT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| BridgeError::UpstreamConnect(e.to_string()))?;

    info!(status = %response.status(), "Connected to upstream realtime endpoint");
    Ok(socket)
}

/// Text frame carrying a client event.
pub fn event_frame(event: &ClientEvent) -> BridgeResult<Message> {
    let json = serde_json::to_string(event)
        .map_err(|e| BridgeError::UpstreamTransport(format!("failed to serialize event: {e}")))?;
    Ok(Message::Text(json.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers_with_key() {
        let mut config = ServerConfig::default();
        config.openai_api_key = Some("sk-test".to_string());

        let request = build_upstream_request(&config).unwrap();
        let headers = request.headers();

        assert_eq!(headers["Authorization"], "Bearer sk-test");
        assert_eq!(headers["OpenAI-Beta"], "realtime=v1");
        assert_eq!(headers["Host"], "api.openai.com");
        assert_eq!(headers["Upgrade"], "websocket");
        assert!(headers.contains_key("Sec-WebSocket-Key"));
        assert!(
            request
                .uri()
                .to_string()
                .ends_with("?model=gpt-4o-realtime-preview-2024-12-17")
        );
    }

    #[test]
    fn test_request_without_key() {
        let mut config = ServerConfig::default();
        config.upstream_url = "ws://127.0.0.1:9000/v1/realtime".to_string();

        let request = build_upstream_request(&config).unwrap();
        assert!(!request.headers().contains_key("Authorization"));
        assert_eq!(request.headers()["Host"], "127.0.0.1:9000");
    }

    #[test]
    fn test_event_frame() {
        let frame = event_frame(&ClientEvent::ResponseCancel).unwrap();
        match frame {
            Message::Text(text) => assert_eq!(text.as_str(), r#"{"type":"response.cancel"}"#),
            other => panic!("Expected text frame, got {other:?}"),
        }
    }
}
