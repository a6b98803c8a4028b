//! Connection limit middleware for WebSocket connections
//!
//! This module provides middleware to enforce connection limits:
//! - Global maximum WebSocket connections
//! - Per-IP connection limits
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use voicebridge_gateway::middleware::connection_limit_middleware;
//!
//! let app = Router::new()
//!     .route("/realtime", get(bridge_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client IP of a connection that holds a reserved slot.
///
/// The bridge handler releases the slot when the session ends.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

/// Middleware that enforces connection limits for WebSocket connections.
///
/// This middleware:
/// 1. Checks if the global WebSocket connection limit has been reached
/// 2. Checks if the per-IP connection limit has been reached
/// 3. Returns 503 Service Unavailable if global limit is exceeded
/// 4. Returns 429 Too Many Requests if per-IP limit is exceeded
/// 5. Injects `ClientIp` extension so handlers can release the connection later
/// 6. Releases the slot itself when the request is not switched to WebSocket
///    (for example a rejected query string)
///
/// The middleware only applies to WebSocket upgrade requests (detected by the
/// Upgrade header). Non-WebSocket requests pass through without limit checks.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    // Only apply limits to WebSocket upgrade requests
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        // Not a WebSocket upgrade, pass through
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    // Try to acquire a connection slot
    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            let response = next.run(request).await;
            // Only a switched connection hands the slot to the handler
            if response.status() != StatusCode::SWITCHING_PROTOCOLS {
                state.release_connection(client_ip);
            }
            response
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting connection: global limit reached"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting connection: per-IP limit reached"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}
