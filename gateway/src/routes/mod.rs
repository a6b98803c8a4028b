//! Route assembly.

pub mod api;
pub mod bridge;

use axum::{Router, middleware};
use http::{Method, header::CONTENT_TYPE};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use crate::middleware::connection_limit_middleware;
use crate::state::AppState;

/// Build the complete application router.
///
/// The bridge route sits behind the connection-limit middleware, which needs
/// `ConnectInfo<SocketAddr>`; serve the router with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    let bridge_routes = bridge::create_bridge_router().layer(middleware::from_fn_with_state(
        app_state.clone(),
        connection_limit_middleware,
    ));

    let cors_layer = cors_layer(app_state.config.cors_allowed_origins.as_deref());

    // Security headers
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    api::create_api_router()
        .merge(bridge_routes)
        .with_state(app_state)
        .layer(cors_layer)
        .layer(security_headers)
}

/// CORS policy from the configured origins.
///
/// `"*"` allows any origin, a comma-separated list allows exactly those, and
/// no value restricts the server to same-origin requests.
pub fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    match origins {
        Some("*") => base.allow_origin(Any).allow_credentials(false),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            base.allow_origin(origins).allow_credentials(true)
        }
        None => {
            info!(
                "CORS not configured, defaulting to same-origin only. \
                 Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
            );
            base.allow_credentials(false)
        }
    }
}
