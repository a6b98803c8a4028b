//! Shared application state.
//!
//! Holds the loaded configuration, the instruction template, connection
//! counters used by the connection-limit middleware and the registry of live
//! bridge sessions. Nothing here is mutated by a session's relay loop except
//! its own registry entry.

use dashmap::DashMap;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::core::realtime::{
    InstructionTemplate, PlaceholderTemplate, RealtimeVoice, TemplateError,
};

/// Why a WebSocket connection was refused before upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Registry entry for a live session.
#[derive(Debug, Clone)]
struct SessionEntry {
    voice: RealtimeVoice,
    temperature: f32,
    client_ip: Option<IpAddr>,
    started_at: Instant,
}

/// Diagnostic view of a live session.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub voice: String,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    pub age_secs: u64,
}

/// Live bridge sessions keyed by session id.
///
/// Entries are only created through [`SessionRegistry::register`], whose
/// guard removes the entry when dropped, so every relay exit path (normal
/// close, upstream failure, panic unwinding) releases it.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return the guard owning its entry.
    pub fn register(
        &self,
        session_id: &str,
        voice: RealtimeVoice,
        temperature: f32,
        client_ip: Option<IpAddr>,
    ) -> SessionGuard {
        self.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                voice,
                temperature,
                client_ip,
                started_at: Instant::now(),
            },
        );
        debug!(session_id = %session_id, active = self.sessions.len(), "Session registered");

        SessionGuard {
            registry: self.clone(),
            session_id: session_id.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Summaries of all live sessions, oldest first.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<(Instant, SessionSummary)> = self
            .sessions
            .iter()
            .map(|entry| {
                let info = entry.value();
                (
                    info.started_at,
                    SessionSummary {
                        session_id: entry.key().clone(),
                        voice: info.voice.as_str().to_string(),
                        temperature: info.temperature,
                        client_ip: info.client_ip.map(|ip| ip.to_string()),
                        age_secs: info.started_at.elapsed().as_secs(),
                    },
                )
            })
            .collect();
        summaries.sort_by_key(|(started_at, _)| *started_at);
        summaries.into_iter().map(|(_, summary)| summary).collect()
    }

    fn update(&self, session_id: &str, voice: RealtimeVoice, temperature: f32) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.voice = voice;
            entry.temperature = temperature;
        }
    }

    fn remove(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            debug!(session_id = %session_id, active = self.sessions.len(), "Session removed");
        }
    }
}

/// Owns a registry entry; dropping it removes the session.
#[derive(Debug)]
pub struct SessionGuard {
    registry: SessionRegistry,
    session_id: String,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record a voice/temperature change for diagnostics.
    pub fn update(&self, voice: RealtimeVoice, temperature: f32) {
        self.registry.update(&self.session_id, voice, temperature);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.session_id);
    }
}

/// Application state shared by every handler.
pub struct AppState {
    pub config: ServerConfig,
    /// Instruction template used by the session configuration builder
    pub template: Arc<dyn InstructionTemplate>,
    pub sessions: SessionRegistry,

    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build state from configuration, loading the instruction template file
    /// when one is configured.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, TemplateError> {
        let template: Arc<dyn InstructionTemplate> = match &config.instructions_template_path {
            Some(path) => {
                info!(path = %path.display(), "Loading instruction template");
                Arc::new(PlaceholderTemplate::from_file(path)?)
            }
            None => Arc::new(PlaceholderTemplate::default()),
        };
        Ok(Self::with_template(config, template))
    }

    /// Build state with an explicit instruction template.
    pub fn with_template(config: ServerConfig, template: Arc<dyn InstructionTemplate>) -> Arc<Self> {
        Arc::new(Self {
            config,
            template,
            sessions: SessionRegistry::new(),
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Reserve a WebSocket connection slot for `ip`.
    ///
    /// Every successful call must be paired with [`AppState::release_connection`].
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        match self.config.max_websocket_connections {
            Some(max) => {
                self.ws_connections
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                        (current < max).then_some(current + 1)
                    })
                    .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;
            }
            None => {
                self.ws_connections.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut count = self.ip_connections.entry(ip).or_insert(0);
        if *count >= self.config.max_connections_per_ip {
            drop(count);
            self.ws_connections.fetch_sub(1, Ordering::SeqCst);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *count += 1;
        Ok(())
    }

    /// Release a slot reserved by [`AppState::try_acquire_connection`].
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });

        if let Some(mut count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}
