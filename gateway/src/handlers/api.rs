//! Health and diagnostics endpoints.

use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::state::{AppState, SessionSummary};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Live sessions, for diagnostics.
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub count: usize,
    pub sessions: Vec<SessionSummary>,
}

/// `GET /`
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /sessions`
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    let sessions = state.sessions.summaries();
    Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}
