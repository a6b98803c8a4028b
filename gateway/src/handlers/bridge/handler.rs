//! Bridge WebSocket handler
//!
//! One relay task per client connection. The task owns the [`Session`], the
//! upstream socket and the client receiver; a separate sender task drains
//! outgoing client frames so upstream reads never wait on a slow client.

use axum::{
    Extension,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::select;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::core::realtime::ServerEvent;
use crate::errors::{BridgeError, BridgeResult};
use crate::middleware::ClientIp;
use crate::state::{AppState, SessionGuard};

use super::messages::{
    BridgeIncomingMessage, BridgeMessageRoute, BridgeOutgoingMessage, event_type,
};
use super::session::Session;
use super::upstream::{UpstreamSocket, connect_upstream, event_frame};

/// Optimized channel buffer size for audio workloads
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Upper bound on how often the idle check runs
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Time allowed to flush pending frames to the client before closing
const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(2);

type UpstreamSink = SplitSink<UpstreamSocket, UpstreamMessage>;
type UpstreamStream = SplitStream<UpstreamSocket>;

/// Query parameters accepted on the bridge endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct BridgeQuery {
    /// Voice id or alias; the configured default when absent
    pub voice: Option<String>,
    /// Sampling temperature; clamped to the accepted range
    pub temperature: Option<f32>,
}

/// Connection slot reserved by the connection-limit middleware.
struct ConnectionSlot {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}

/// Bridge WebSocket handler
///
/// Upgrades the HTTP connection and relays the conversation between the
/// client and the upstream realtime endpoint.
///
/// # Arguments
/// * `ws` - The WebSocket upgrade request from Axum
/// * `state` - Application state containing configuration and the registry
/// * `query` - Initial voice and temperature
/// * `client_ip` - Set by the connection-limit middleware when it reserved a slot
pub async fn bridge_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<BridgeQuery>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    info!(
        voice = ?query.voice,
        temperature = ?query.temperature,
        "Bridge WebSocket connection upgrade requested"
    );

    // Dropped with the upgrade callback, so a failed upgrade still releases it
    let slot = client_ip.map(|Extension(ClientIp(ip))| ConnectionSlot {
        state: state.clone(),
        ip,
    });

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_bridge_socket(socket, state, query, slot))
}

async fn handle_bridge_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    query: BridgeQuery,
    slot: Option<ConnectionSlot>,
) {
    let settings = app_state
        .config
        .session_defaults()
        .with_overrides(query.voice.as_deref(), query.temperature);
    let session = Session::new(settings);
    let client_ip = slot.as_ref().map(|slot| slot.ip);

    let guard = app_state.sessions.register(
        session.id(),
        session.voice(),
        session.temperature(),
        client_ip,
    );

    let span = info_span!("bridge", session_id = %session.id());
    run_session(socket, session, app_state, &guard)
        .instrument(span)
        .await;

    drop(guard);
    drop(slot);
}

/// Connect upstream, then relay until either leg closes.
async fn run_session(
    socket: WebSocket,
    mut session: Session,
    app_state: Arc<AppState>,
    guard: &SessionGuard,
) {
    info!(
        voice = %session.voice(),
        temperature = session.temperature(),
        "Bridge WebSocket connection established"
    );

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<BridgeMessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing client frames
    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let should_close = matches!(route, BridgeMessageRoute::Close);

            let result = match route {
                BridgeMessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                BridgeMessageRoute::Relay(text) => sender.send(Message::Text(text.into())).await,
                BridgeMessageRoute::Close => {
                    debug!("Closing client WebSocket connection");
                    sender.send(Message::Close(None)).await
                }
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }

            if should_close {
                break;
            }
        }
    });

    let Some((connected, early_frames)) = await_upstream(&mut receiver, &app_state).await else {
        info!("Client left during the upstream handshake");
        session.begin_close();
        session.mark_closed();
        sender_task.abort();
        return;
    };

    match connected {
        Ok(upstream) => {
            let (mut upstream_sink, upstream_stream) = upstream.split();

            if open_session(&mut session, &mut upstream_sink, &message_tx, &app_state).await
                && replay_early_frames(
                    early_frames,
                    &mut session,
                    &mut upstream_sink,
                    &message_tx,
                    &app_state,
                    guard,
                )
                .await
            {
                relay(
                    &mut session,
                    &mut receiver,
                    &mut upstream_sink,
                    upstream_stream,
                    &message_tx,
                    &app_state,
                    guard,
                )
                .await;
            }

            session.begin_close();
            close_upstream(&mut upstream_sink).await;
        }
        Err(e) => {
            error!("Upstream connection failed: {}", e);
            session.begin_close();
            send_error(&message_tx, &e).await;
        }
    }

    // Cleanup
    let _ = message_tx.send(BridgeMessageRoute::Close).await;
    drop(message_tx);
    if tokio::time::timeout(CLOSE_GRACE_PERIOD, &mut sender_task)
        .await
        .is_err()
    {
        sender_task.abort();
    }

    session.mark_closed();
    info!(
        response_active = session.responses().is_active(),
        "Bridge WebSocket connection terminated"
    );
}

/// Open the upstream leg while watching the client socket.
///
/// Returns `None` when the client disconnects first; the pending handshake is
/// dropped with it. Frames the client sends meanwhile are kept in order.
async fn await_upstream(
    receiver: &mut SplitStream<WebSocket>,
    app_state: &Arc<AppState>,
) -> Option<(BridgeResult<UpstreamSocket>, Vec<Message>)> {
    let connect = connect_upstream(&app_state.config);
    tokio::pin!(connect);
    let mut early_frames = Vec::new();

    loop {
        select! {
            result = &mut connect => return Some((result, early_frames)),
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => {
                    debug!("Client WebSocket error during upstream handshake: {}", e);
                    return None;
                }
                Some(Ok(msg)) => early_frames.push(msg),
            },
        }
    }
}

/// Forward frames received before the session opened. Returns false when the
/// session should end.
async fn replay_early_frames(
    frames: Vec<Message>,
    session: &mut Session,
    upstream_sink: &mut UpstreamSink,
    message_tx: &mpsc::Sender<BridgeMessageRoute>,
    app_state: &Arc<AppState>,
    guard: &SessionGuard,
) -> bool {
    for frame in frames {
        if !process_client_message(frame, session, upstream_sink, message_tx, app_state, guard)
            .await
        {
            return false;
        }
    }
    true
}

/// Send the initial `session.update` and acknowledge the client.
async fn open_session(
    session: &mut Session,
    upstream_sink: &mut UpstreamSink,
    message_tx: &mpsc::Sender<BridgeMessageRoute>,
    app_state: &Arc<AppState>,
) -> bool {
    match session.initial_update(app_state.template.as_ref()) {
        Ok(event) => {
            let sent = match event_frame(&event) {
                Ok(frame) => upstream_sink
                    .send(frame)
                    .await
                    .map_err(|e| BridgeError::UpstreamTransport(e.to_string())),
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                error!("Failed to send initial session.update: {}", e);
                send_error(message_tx, &e).await;
                return false;
            }
        }
        Err(e) => {
            let err = BridgeError::from(e);
            warn!("Initial session configuration failed: {}", err);
            send_error(message_tx, &err).await;
        }
    }

    session.open();
    message_tx
        .send(BridgeMessageRoute::Outgoing(
            BridgeOutgoingMessage::ConnectionEstablished {
                session_id: session.id().to_string(),
            },
        ))
        .await
        .is_ok()
}

/// Relay loop. Returns when either leg closes, errors or idles out.
#[allow(clippy::too_many_arguments)]
async fn relay(
    session: &mut Session,
    receiver: &mut SplitStream<WebSocket>,
    upstream_sink: &mut UpstreamSink,
    mut upstream_stream: UpstreamStream,
    message_tx: &mpsc::Sender<BridgeMessageRoute>,
    app_state: &Arc<AppState>,
    guard: &SessionGuard,
) {
    let idle_timeout = app_state.config.idle_timeout();
    let check_interval = idle_timeout.min(IDLE_CHECK_INTERVAL);

    // Track last client activity for idle connection detection
    let mut last_activity = Instant::now();
    let mut idle_check = tokio::time::interval(check_interval);
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    idle_check.tick().await;

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        let continue_processing = process_client_message(
                            msg,
                            session,
                            upstream_sink,
                            message_tx,
                            app_state,
                            guard,
                        ).await;

                        if !continue_processing {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Client WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("Bridge WebSocket connection closed by client");
                        break;
                    }
                }
            }
            msg_result = upstream_stream.next() => {
                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_upstream_message(msg, session, upstream_sink, message_tx).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let err = BridgeError::UpstreamTransport(e.to_string());
                        warn!("{}", err);
                        send_error(message_tx, &err).await;
                        break;
                    }
                    None => {
                        info!("Upstream connection closed");
                        break;
                    }
                }
            }
            _ = idle_check.tick() => {
                if last_activity.elapsed() >= idle_timeout {
                    warn!(
                        "Bridge WebSocket connection idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    send_error(message_tx, &BridgeError::IdleTimeout).await;
                    break;
                }
                debug!("Bridge WebSocket connection idle check - still active");
            }
        }
    }
}

/// Process a client frame. Returns false when the session should end.
async fn process_client_message(
    msg: Message,
    session: &mut Session,
    upstream_sink: &mut UpstreamSink,
    message_tx: &mpsc::Sender<BridgeMessageRoute>,
    app_state: &Arc<AppState>,
    guard: &SessionGuard,
) -> bool {
    match msg {
        Message::Text(text) => {
            process_client_text(
                text.as_str(),
                session,
                upstream_sink,
                message_tx,
                app_state,
                guard,
            )
            .await
        }
        Message::Binary(data) => match std::str::from_utf8(&data) {
            Ok(text) => {
                process_client_text(text, session, upstream_sink, message_tx, app_state, guard)
                    .await
            }
            Err(_) => {
                let err = BridgeError::InvalidMessage("binary frames must be UTF-8 JSON".into());
                warn!("Dropping client frame: {}", err);
                send_error(message_tx, &err).await;
                true
            }
        },
        Message::Ping(_) => {
            debug!("Received ping");
            true
        }
        Message::Pong(_) => {
            debug!("Received pong");
            true
        }
        Message::Close(_) => {
            info!("Bridge WebSocket close received");
            false
        }
    }
}

async fn process_client_text(
    text: &str,
    session: &mut Session,
    upstream_sink: &mut UpstreamSink,
    message_tx: &mpsc::Sender<BridgeMessageRoute>,
    app_state: &Arc<AppState>,
    guard: &SessionGuard,
) -> bool {
    let incoming = match BridgeIncomingMessage::parse(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to parse client message: {}", e);
            send_error(message_tx, &e).await;
            return true;
        }
    };

    let frame = match incoming {
        BridgeIncomingMessage::SessionUpdate {
            parameters: Some(params),
        } => match session.apply_parameters(params, app_state.template.as_ref()) {
            Ok(event) => {
                guard.update(session.voice(), session.temperature());
                info!(
                    voice = %session.voice(),
                    temperature = session.temperature(),
                    "Session parameters applied"
                );
                match event_frame(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("{}", e);
                        return true;
                    }
                }
            }
            Err(e) => {
                let err = BridgeError::from(e);
                warn!("Session parameters rejected: {}", err);
                send_error(message_tx, &err).await;
                return true;
            }
        },
        BridgeIncomingMessage::ResponseCreate {} => {
            session.responses_mut().on_client_create();
            verbatim(text)
        }
        BridgeIncomingMessage::ResponseCancel {} => {
            session.responses_mut().on_client_cancel();
            verbatim(text)
        }
        BridgeIncomingMessage::ItemTruncate {
            item_id,
            audio_end_ms,
        } => {
            debug!(item_id = ?item_id, audio_end_ms = ?audio_end_ms, "Forwarding truncate");
            verbatim(text)
        }
        BridgeIncomingMessage::SessionUpdate { parameters: None } | BridgeIncomingMessage::Other => {
            verbatim(text)
        }
    };

    if let Err(e) = upstream_sink.send(frame).await {
        let err = BridgeError::UpstreamTransport(e.to_string());
        warn!("Failed to forward client message: {}", err);
        send_error(message_tx, &err).await;
        return false;
    }
    true
}

/// Process an upstream frame. Returns false when the session should end.
async fn process_upstream_message(
    msg: UpstreamMessage,
    session: &mut Session,
    upstream_sink: &mut UpstreamSink,
    message_tx: &mpsc::Sender<BridgeMessageRoute>,
) -> bool {
    match msg {
        UpstreamMessage::Text(text) => {
            relay_upstream_text(text.as_str().to_owned(), session, message_tx).await
        }
        UpstreamMessage::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => relay_upstream_text(text, session, message_tx).await,
            Err(_) => {
                warn!(bytes = data.len(), "Dropping non-UTF-8 binary frame from upstream");
                true
            }
        },
        UpstreamMessage::Ping(payload) => {
            if let Err(e) = upstream_sink.send(UpstreamMessage::Pong(payload)).await {
                warn!("Failed to answer upstream ping: {}", e);
                return false;
            }
            true
        }
        UpstreamMessage::Pong(_) => true,
        UpstreamMessage::Close(frame) => {
            info!(frame = ?frame, "Upstream close received");
            false
        }
        UpstreamMessage::Frame(_) => true,
    }
}

async fn relay_upstream_text(
    text: String,
    session: &mut Session,
    message_tx: &mpsc::Sender<BridgeMessageRoute>,
) -> bool {
    match serde_json::from_str::<ServerEvent>(&text) {
        Ok(event) => {
            if let ServerEvent::Error { error } = &event {
                warn!(message = error.message(), "Upstream error event");
            }
            session.responses_mut().on_upstream_event(&event);
        }
        Err(e) => debug!(
            event_type = ?event_type(&text),
            "Relaying upstream frame without bookkeeping: {}",
            e
        ),
    }

    message_tx.send(BridgeMessageRoute::Relay(text)).await.is_ok()
}

fn verbatim(text: &str) -> UpstreamMessage {
    UpstreamMessage::Text(text.to_owned().into())
}

async fn send_error(message_tx: &mpsc::Sender<BridgeMessageRoute>, err: &BridgeError) {
    let _ = message_tx
        .send(BridgeMessageRoute::Outgoing(BridgeOutgoingMessage::from(err)))
        .await;
}

async fn close_upstream(upstream_sink: &mut UpstreamSink) {
    match tokio::time::timeout(CLOSE_GRACE_PERIOD, upstream_sink.close()).await {
        Ok(Ok(())) => debug!("Upstream connection closed"),
        Ok(Err(e)) => debug!("Upstream close returned error: {}", e),
        Err(_) => warn!("Timed out closing upstream connection"),
    }
}
