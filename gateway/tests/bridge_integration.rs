//! Bridge integration tests
//!
//! Runs the real router on an ephemeral port against a mock upstream
//! realtime endpoint and drives it with a plain WebSocket client.
//!
//! Run: cargo test --test bridge_integration

mod mock_upstream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use mock_upstream::MockUpstream;
use voicebridge_gateway::{
    ServerConfig,
    client::{BridgeConnection, Conversation, ConversationConfig, WavOutput, bridge_url},
    core::audio::{encode_frame, to_transport},
    core::turn::{Role, TranscriptMessage, TurnState},
    routes,
    state::AppState,
};

type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config(upstream_url: String) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.upstream_url = upstream_url;
    config.openai_api_key = Some("test-key".to_string());
    config
}

async fn spawn_bridge(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(config).unwrap();
    let app = routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, state)
}

async fn connect_client(addr: SocketAddr, query: &str) -> ClientSocket {
    let url = format!("ws://{addr}/realtime{query}");
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

/// Next text frame from the bridge as JSON; `None` when the bridge closed.
async fn next_client_event(socket: &mut ClientSocket) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for the bridge");
        match frame {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn send_json(socket: &mut ClientSocket, event: Value) {
    socket
        .send(Message::Text(event.to_string().into()))
        .await
        .unwrap();
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(RECV_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_session_opens_with_initial_update() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = spawn_bridge(test_config(upstream.url())).await;

    let mut client = connect_client(addr, "?voice=AndrewNeural&temperature=0.9").await;
    let mut conn = upstream.accept().await;

    assert!(conn.path_and_query.starts_with("/v1/realtime?model="));
    assert_eq!(conn.authorization.as_deref(), Some("Bearer test-key"));
    assert_eq!(conn.beta_header.as_deref(), Some("realtime=v1"));

    let update = conn.next_json().await;
    assert_eq!(update["type"], "session.update");
    assert_eq!(update["session"]["voice"], "echo");
    let temperature = update["session"]["temperature"].as_f64().unwrap();
    assert!((temperature - 0.9).abs() < 1e-6);
    assert!(
        !update["session"]["instructions"]
            .as_str()
            .unwrap_or_default()
            .is_empty()
    );

    let established = next_client_event(&mut client).await.unwrap();
    assert_eq!(established["type"], "connection.established");
    let session_id = established["session_id"].as_str().unwrap();
    assert!(!session_id.is_empty());

    assert!(state.sessions.contains(session_id));
    let summaries = state.sessions.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].voice, "echo");
}

#[tokio::test]
async fn test_client_events_forwarded_verbatim() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = spawn_bridge(test_config(upstream.url())).await;

    let mut client = connect_client(addr, "").await;
    let mut conn = upstream.accept().await;
    conn.next_of_type("session.update").await;
    next_client_event(&mut client).await.unwrap();

    let raw = r#"{"type":"input_audio_buffer.append","event_id":"evt_1","audio":"AAAA"}"#;
    client.send(Message::Text(raw.into())).await.unwrap();
    assert_eq!(conn.next_text().await, raw);

    let custom = r#"{"type":"some.future.event","payload":{"nested":[1,2,3]}}"#;
    client.send(Message::Text(custom.into())).await.unwrap();
    assert_eq!(conn.next_text().await, custom);

    // binary JSON from the client is relayed as text
    client
        .send(Message::Binary(br#"{"type":"input_audio_buffer.commit"}"#.to_vec().into()))
        .await
        .unwrap();
    assert_eq!(conn.next_text().await, r#"{"type":"input_audio_buffer.commit"}"#);
}

#[tokio::test]
async fn test_malformed_message_keeps_session_open() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = spawn_bridge(test_config(upstream.url())).await;

    let mut client = connect_client(addr, "").await;
    let mut conn = upstream.accept().await;
    conn.next_of_type("session.update").await;
    next_client_event(&mut client).await.unwrap();

    client
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    let error = next_client_event(&mut client).await.unwrap();
    assert_eq!(error["type"], "error");
    assert_eq!(error["error"]["type"], "bridge_error");
    assert_eq!(error["error"]["code"], "parse_error");

    send_json(&mut client, json!({"type": "response.create"})).await;
    let forwarded = conn.next_json().await;
    assert_eq!(forwarded["type"], "response.create");
}

#[tokio::test]
async fn test_scenario_parameters_replaced_by_session_config() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = spawn_bridge(test_config(upstream.url())).await;

    let mut client = connect_client(addr, "?voice=alloy").await;
    let mut conn = upstream.accept().await;
    let initial = conn.next_of_type("session.update").await;
    assert_eq!(initial["session"]["voice"], "alloy");
    next_client_event(&mut client).await.unwrap();

    send_json(
        &mut client,
        json!({
            "type": "session.update",
            "parameters": {
                "voice": "AndrewNeural",
                "temperature": 1.1,
                "persona": "a ship's navigator",
                "scenario": "docking at night"
            }
        }),
    )
    .await;

    let update = conn.next_json().await;
    assert_eq!(update["type"], "session.update");
    assert!(update.get("parameters").is_none());
    assert_eq!(update["session"]["voice"], "echo");
    let instructions = update["session"]["instructions"].as_str().unwrap();
    assert!(instructions.contains("a ship's navigator"));

    wait_for(|| {
        state
            .sessions
            .summaries()
            .first()
            .is_some_and(|s| s.voice == "echo")
    })
    .await;

    // a raw session.update without parameters is not rewritten
    let raw = r#"{"type":"session.update","session":{"modalities":["text"]}}"#;
    client.send(Message::Text(raw.into())).await.unwrap();
    assert_eq!(conn.next_text().await, raw);
}

#[tokio::test]
async fn test_upstream_events_relayed_to_client() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = spawn_bridge(test_config(upstream.url())).await;

    let mut client = connect_client(addr, "").await;
    let mut conn = upstream.accept().await;
    conn.next_of_type("session.update").await;
    next_client_event(&mut client).await.unwrap();

    conn.send_json(json!({"type": "session.updated", "session": {"voice": "alloy"}}));
    let relayed = next_client_event(&mut client).await.unwrap();
    assert_eq!(relayed["type"], "session.updated");

    conn.send(Message::Binary(
        br#"{"type":"response.audio.done","item_id":"item_1"}"#.to_vec().into(),
    ));
    let relayed = next_client_event(&mut client).await.unwrap();
    assert_eq!(relayed["type"], "response.audio.done");
    assert_eq!(relayed["item_id"], "item_1");

    // unknown event types pass through untouched
    conn.send_json(json!({"type": "rate_limits.updated", "rate_limits": []}));
    let relayed = next_client_event(&mut client).await.unwrap();
    assert_eq!(relayed["type"], "rate_limits.updated");
}

#[tokio::test]
async fn test_client_disconnect_mid_response_closes_upstream() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = spawn_bridge(test_config(upstream.url())).await;

    let mut client = connect_client(addr, "").await;
    let mut conn = upstream.accept().await;
    conn.next_of_type("session.update").await;
    next_client_event(&mut client).await.unwrap();
    assert_eq!(state.sessions.len(), 1);

    send_json(&mut client, json!({"type": "response.create"})).await;
    conn.next_of_type("response.create").await;

    // the reply is still streaming when the client goes away
    let audio = to_transport(&encode_frame(&vec![0.1f32; 2400]));
    conn.send_json(json!({"type": "response.created", "response": {"id": "resp_1"}}));
    conn.send_json(json!({
        "type": "response.output_item.added",
        "response_id": "resp_1",
        "item": {"id": "item_1", "type": "message", "role": "assistant"}
    }));
    for _ in 0..3 {
        conn.send_json(json!({
            "type": "response.audio.delta",
            "response_id": "resp_1",
            "item_id": "item_1",
            "delta": audio
        }));
    }

    let created = next_client_event(&mut client).await.unwrap();
    assert_eq!(created["type"], "response.created");
    let added = next_client_event(&mut client).await.unwrap();
    assert_eq!(added["type"], "response.output_item.added");
    let delta = next_client_event(&mut client).await.unwrap();
    assert_eq!(delta["type"], "response.audio.delta");

    client.close(None).await.unwrap();
    conn.wait_closed().await;

    wait_for(|| state.sessions.is_empty() && state.ws_connection_count() == 0).await;
}

#[tokio::test]
async fn test_client_leaving_during_upstream_handshake() {
    // accepts TCP but never answers the WebSocket handshake
    let stalled = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stalled_addr = stalled.local_addr().unwrap();
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel::<TcpStream>();
    tokio::spawn(async move {
        while let Ok((stream, _)) = stalled.accept().await {
            let _ = accepted_tx.send(stream);
        }
    });

    let (addr, state) =
        spawn_bridge(test_config(format!("ws://{stalled_addr}/v1/realtime"))).await;
    let mut client = connect_client(addr, "").await;
    let mut handshake = tokio::time::timeout(RECV_TIMEOUT, accepted_rx.recv())
        .await
        .unwrap()
        .unwrap();
    wait_for(|| state.sessions.len() == 1).await;

    client.close(None).await.unwrap();

    // released well before the upstream handshake timeout
    wait_for(|| state.sessions.is_empty() && state.ws_connection_count() == 0).await;

    // the pending upstream connection is dropped too
    let mut buf = [0u8; 1024];
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match handshake.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await
    .expect("upstream handshake connection was not dropped");
}

#[tokio::test]
async fn test_upstream_close_closes_client() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = spawn_bridge(test_config(upstream.url())).await;

    let mut client = connect_client(addr, "").await;
    let mut conn = upstream.accept().await;
    conn.next_of_type("session.update").await;
    next_client_event(&mut client).await.unwrap();

    conn.close();
    assert!(next_client_event(&mut client).await.is_none());

    wait_for(|| state.sessions.is_empty() && state.ws_connection_count() == 0).await;
}

#[tokio::test]
async fn test_unreachable_upstream_reports_error() {
    // bind then drop to get a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let (addr, state) = spawn_bridge(test_config(format!("ws://127.0.0.1:{port}/v1/realtime"))).await;

    let mut client = connect_client(addr, "").await;
    let error = next_client_event(&mut client).await.unwrap();
    assert_eq!(error["type"], "error");
    assert_eq!(error["error"]["code"], "upstream_connect_failed");
    assert!(next_client_event(&mut client).await.is_none());

    wait_for(|| state.sessions.is_empty() && state.ws_connection_count() == 0).await;
}

#[tokio::test]
async fn test_connection_limit_rejects_handshake() {
    let mut upstream = MockUpstream::start().await;
    let mut config = test_config(upstream.url());
    config.max_websocket_connections = Some(1);
    let (addr, state) = spawn_bridge(config).await;

    let mut first = connect_client(addr, "").await;
    let _conn = upstream.accept().await;
    next_client_event(&mut first).await.unwrap();

    let rejected = connect_async(format!("ws://{addr}/realtime")).await;
    match rejected {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), http::StatusCode::SERVICE_UNAVAILABLE);
        }
        other => panic!("Expected HTTP rejection, got {:?}", other.map(|_| ())),
    }
    assert_eq!(state.ws_connection_count(), 1);
}

#[tokio::test]
async fn test_text_turn_through_client_conversation() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = spawn_bridge(test_config(upstream.url())).await;

    // Scripted upstream: one spoken reply per response.create
    let responder = tokio::spawn(async move {
        let mut conn = upstream.accept().await;
        conn.next_of_type("session.update").await;

        let item = conn.next_json().await;
        assert_eq!(item["type"], "conversation.item.create");
        assert_eq!(item["item"]["content"][0]["text"], "Hello there");
        conn.next_of_type("response.create").await;

        let audio = to_transport(&encode_frame(&vec![0.25f32; 2400]));
        conn.send_json(json!({"type": "response.created", "response": {"id": "resp_1"}}));
        conn.send_json(json!({
            "type": "response.output_item.added",
            "response_id": "resp_1",
            "item": {"id": "item_1", "type": "message", "role": "assistant"}
        }));
        conn.send_json(json!({
            "type": "response.audio.delta",
            "response_id": "resp_1",
            "item_id": "item_1",
            "delta": audio
        }));
        conn.send_json(json!({
            "type": "response.audio_transcript.delta",
            "item_id": "item_1",
            "delta": "General "
        }));
        conn.send_json(json!({
            "type": "response.audio_transcript.delta",
            "item_id": "item_1",
            "delta": "Kenobi"
        }));
        conn.send_json(json!({"type": "response.audio.done", "item_id": "item_1"}));
        conn.send_json(json!({
            "type": "response.done",
            "response": {"id": "resp_1", "status": "completed"}
        }));
        conn.wait_closed().await;
    });

    let dir = tempfile::TempDir::new().unwrap();
    let wav_path = dir.path().join("reply.wav");

    let url = bridge_url(&format!("ws://{addr}/realtime"), Some("AndrewNeural"), None).unwrap();
    let connection = BridgeConnection::connect(url.as_str()).await.unwrap();
    let (transcript_tx, mut transcript_rx) = mpsc::unbounded_channel::<TranscriptMessage>();
    let mut conversation = Conversation::new(
        connection,
        WavOutput::create(&wav_path),
        Box::new(transcript_tx),
        ConversationConfig {
            response_timeout: Duration::from_secs(5),
            ..Default::default()
        },
    );

    conversation.send_text("Hello there").unwrap();
    assert_eq!(conversation.state(), TurnState::AwaitingResponse);
    conversation.wait_until_idle().await.unwrap();
    conversation.shutdown().await;

    tokio::time::timeout(RECV_TIMEOUT, responder)
        .await
        .unwrap()
        .unwrap();

    let user = transcript_rx.recv().await.unwrap();
    assert_eq!(user.role, Role::User);
    assert_eq!(user.text, "Hello there");
    let assistant = transcript_rx.recv().await.unwrap();
    assert_eq!(assistant.role, Role::Assistant);
    assert_eq!(assistant.text, "General Kenobi");
    assert!(!assistant.interrupted);

    let reader = hound::WavReader::open(&wav_path).unwrap();
    assert!(reader.len() >= 2400);
}
