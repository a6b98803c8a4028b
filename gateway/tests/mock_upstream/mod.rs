//! Mock upstream realtime endpoint
//!
//! Accepts WebSocket connections the way the upstream realtime service would,
//! records the handshake and every frame the bridge sends, and lets a test
//! push scripted server events back.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Mock upstream server listening on an ephemeral port.
pub struct MockUpstream {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<UpstreamConnection>,
}

/// One upstream connection opened by the bridge.
pub struct UpstreamConnection {
    /// Request path and query of the handshake
    pub path_and_query: String,
    /// `Authorization` header of the handshake, if any
    pub authorization: Option<String>,
    /// `OpenAI-Beta` header of the handshake, if any
    pub beta_header: Option<String>,
    received: mpsc::UnboundedReceiver<Message>,
    outgoing: mpsc::UnboundedSender<Message>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, conn_tx).await {
                        eprintln!("Mock upstream connection error: {}", e);
                    }
                });
            }
        });

        Self { addr, connections }
    }

    /// Base URL to configure as the bridge's upstream.
    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    /// Wait for the bridge to open the next upstream connection.
    pub async fn accept(&mut self) -> UpstreamConnection {
        tokio::time::timeout(RECV_TIMEOUT, self.connections.recv())
            .await
            .expect("timed out waiting for upstream connection")
            .expect("mock upstream stopped")
    }
}

async fn handle_connection(
    stream: TcpStream,
    conn_tx: mpsc::UnboundedSender<UpstreamConnection>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut handshake = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        handshake = Some((
            request
                .uri()
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_default(),
            header("authorization"),
            header("openai-beta"),
        ));
        Ok(response)
    };
    let ws_stream = accept_hdr_async(stream, callback).await?;
    let (path_and_query, authorization, beta_header) = handshake.unwrap_or_default();

    let (mut write, mut read) = ws_stream.split();
    let (received_tx, received) = mpsc::unbounded_channel();
    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

    conn_tx.send(UpstreamConnection {
        path_and_query,
        authorization,
        beta_header,
        received,
        outgoing,
    })?;

    tokio::spawn(async move {
        while let Some(message) = outgoing_rx.recv().await {
            let is_close = matches!(message, Message::Close(_));
            if write.send(message).await.is_err() || is_close {
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(message) = read.next().await {
        match message {
            Ok(message) => {
                let is_close = matches!(message, Message::Close(_));
                if received_tx.send(message).is_err() || is_close {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    Ok(())
}

impl UpstreamConnection {
    /// Next frame from the bridge; `None` once the bridge hung up.
    pub async fn next_frame(&mut self) -> Option<Message> {
        tokio::time::timeout(RECV_TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for a frame from the bridge")
    }

    /// Next text frame, raw.
    pub async fn next_text(&mut self) -> String {
        loop {
            match self.next_frame().await {
                Some(Message::Text(text)) => return text.as_str().to_owned(),
                Some(Message::Close(_)) | None => panic!("bridge closed the upstream connection"),
                Some(_) => continue,
            }
        }
    }

    /// Next text frame parsed as JSON.
    pub async fn next_json(&mut self) -> Value {
        let text = self.next_text().await;
        serde_json::from_str(&text).expect("bridge sent invalid JSON upstream")
    }

    /// Skip frames until one with the given event type arrives.
    pub async fn next_of_type(&mut self, event_type: &str) -> Value {
        loop {
            let event = self.next_json().await;
            if event["type"] == event_type {
                return event;
            }
        }
    }

    /// Wait until the bridge closes the connection.
    pub async fn wait_closed(&mut self) {
        loop {
            match self.next_frame().await {
                Some(Message::Close(_)) | None => return,
                Some(_) => continue,
            }
        }
    }

    pub fn send_json(&self, event: Value) {
        let _ = self.outgoing.send(Message::Text(event.to_string().into()));
    }

    pub fn send(&self, message: Message) {
        let _ = self.outgoing.send(message);
    }

    /// Close from the upstream side.
    pub fn close(&self) {
        let _ = self.outgoing.send(Message::Close(None));
    }
}
