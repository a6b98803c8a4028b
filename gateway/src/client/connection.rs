//! WebSocket connection to the bridge.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::{ClientError, ClientResult};
use crate::core::realtime::{ClientEvent, ServerEvent};
use crate::core::transport::EventTransport;

/// Maximum time to wait for `connection.established`
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Bridge endpoint URL with the optional voice and temperature query.
pub fn bridge_url(base: &str, voice: Option<&str>, temperature: Option<f32>) -> ClientResult<Url> {
    let mut url = Url::parse(base).map_err(|e| ClientError::InvalidUrl(format!("{base}: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ClientError::InvalidUrl(format!(
            "{base}: scheme must be ws or wss"
        )));
    }

    {
        let mut query = url.query_pairs_mut();
        if let Some(voice) = voice {
            query.append_pair("voice", voice);
        }
        if let Some(temperature) = temperature {
            query.append_pair("temperature", &temperature.to_string());
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}

/// An established bridge session.
///
/// Outgoing events go through an unbounded channel drained by a writer task,
/// so sending never suspends the caller. Incoming frames are parsed by a
/// reader task and delivered in order through [`BridgeConnection::next_event`].
pub struct BridgeConnection {
    session_id: String,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    incoming_rx: mpsc::UnboundedReceiver<ServerEvent>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl BridgeConnection {
    /// Connect and wait until the bridge reports its upstream leg open.
    pub async fn connect(url: &str) -> ClientResult<Self> {
        let (socket, _response) = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            tokio_tungstenite::connect_async(url),
        )
        .await
        .map_err(|_| ClientError::Timeout("WebSocket handshake"))?
        .map_err(|e| ClientError::Connect(e.to_string()))?;

        let (mut sink, mut stream) = socket.split();

        let session_id = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            while let Some(frame) = stream.next().await {
                let frame = frame.map_err(|e| ClientError::Connect(e.to_string()))?;
                let Some(event) = parse_frame(frame)? else {
                    continue;
                };
                match event {
                    ServerEvent::ConnectionEstablished { session_id } => return Ok(session_id),
                    ServerEvent::Error { error } => {
                        return Err(ClientError::Rejected(error.message().to_string()));
                    }
                    other => debug!(?other, "Ignoring event before connection.established"),
                }
            }
            Err(ClientError::Closed)
        })
        .await
        .map_err(|_| ClientError::Timeout("connection.established"))??;

        info!(session_id = %session_id, "Bridge session established");

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let writer = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize client event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    debug!("Bridge write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<ServerEvent>();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("Bridge read failed: {}", e);
                        break;
                    }
                };
                match parse_frame(frame) {
                    Ok(Some(event)) => {
                        if incoming_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(ClientError::Closed) => break,
                    Err(e) => warn!("Dropping bridge frame: {}", e),
                }
            }
            debug!("Bridge reader finished");
        });

        Ok(Self {
            session_id,
            events_tx,
            incoming_rx,
            writer,
            reader,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Transport handle for capture and the turn controller.
    pub fn transport(&self) -> Arc<dyn EventTransport> {
        Arc::new(self.events_tx.clone())
    }

    /// Queue an event for the bridge.
    pub fn send(&self, event: ClientEvent) -> ClientResult<()> {
        self.events_tx.send(event).map_err(|_| ClientError::Closed)
    }

    /// Next event from the bridge; `None` once the connection closed.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.incoming_rx.recv().await
    }

    /// Close the connection. Pending outgoing events are flushed first.
    pub async fn close(self) {
        let Self {
            events_tx,
            writer,
            reader,
            ..
        } = self;
        // the writer ends, and closes the socket, once every sender is gone
        drop(events_tx);
        if tokio::time::timeout(Duration::from_secs(2), writer)
            .await
            .is_err()
        {
            debug!("Bridge writer did not finish in time");
        }
        reader.abort();
    }
}

/// Parse one frame. `Ok(None)` for frames that carry no event.
fn parse_frame(frame: Message) -> ClientResult<Option<ServerEvent>> {
    let text = match frame {
        Message::Text(text) => text.as_str().to_owned(),
        Message::Binary(data) => String::from_utf8(data.to_vec())
            .map_err(|_| ClientError::Connect("non-UTF-8 binary frame".to_string()))?,
        Message::Close(_) => return Err(ClientError::Closed),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return Ok(None),
    };
    match serde_json::from_str(&text) {
        Ok(event) => Ok(Some(event)),
        Err(e) => {
            warn!("Unparseable bridge event: {}", e);
            Ok(None)
        }
    }
}
