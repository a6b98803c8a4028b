//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and session diagnostics
//! - `bridge` - Realtime conversation bridge WebSocket

pub mod api;
pub mod bridge;

// Re-export commonly used handlers for convenient access
pub use bridge::bridge_handler;
