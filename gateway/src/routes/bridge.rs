//! Bridge WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::bridge::bridge_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the bridge WebSocket router
///
/// # Endpoint
///
/// `GET /realtime?voice=<id>&temperature=<f32>` - WebSocket upgrade for a
/// realtime conversation
///
/// # Protocol
///
/// After the upgrade the bridge opens the upstream connection and sends
/// `connection.established` with the session id. From then on JSON text frames
/// flow both ways; see [`crate::handlers::bridge`].
///
/// # Example
///
/// ```json
/// // Server acknowledges once upstream is open
/// {"type": "connection.established", "session_id": "..."}
///
/// // Client configures the scenario
/// {"type": "session.update", "parameters": {"voice": "AndrewNeural", "mood": "curious"}}
///
/// // Client streams microphone audio
/// {"type": "input_audio_buffer.append", "audio": "<base64 pcm16>"}
/// ```
pub fn create_bridge_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/realtime", get(bridge_handler))
        .layer(TraceLayer::new_for_http())
}
