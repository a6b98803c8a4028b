//! Realtime conversation bridge
//!
//! Relays a client's conversation to the upstream realtime endpoint over a
//! pair of WebSockets, one [`session::Session`] per client connection.
//!
//! # Protocol
//!
//! Every frame is a JSON text frame with a `type` field. Upstream binary
//! frames are relayed to the client as text.
//!
//! ## Client → Bridge
//!
//! - **session.update** with `parameters`: replaced by a generated
//!   `session.update` (instructions, voice, temperature, turn detection)
//! - **response.cancel**: forwarded; clears response bookkeeping
//! - **everything else**: forwarded verbatim
//!
//! ## Bridge → Client
//!
//! - **connection.established**: sent once the upstream leg is open
//! - **error**: malformed frames, configuration failures, transport errors
//! - **everything upstream sends**: relayed verbatim
//!
//! Either leg closing closes the other and removes the session from the
//! registry.

mod handler;
pub mod messages;
pub mod session;
pub mod upstream;

pub use handler::{BridgeQuery, bridge_handler};
pub use session::{ResponseTracker, Session, SessionState};
