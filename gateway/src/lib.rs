pub mod client;
pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use crate::core::*;
pub use errors::{BridgeError, BridgeResult, ConfigError, ConfigResult};
pub use routes::build_router;
pub use state::AppState;
