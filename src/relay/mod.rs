//! Relay transport and relay process
//!
//! Handles:
//! - MessagePack wire protocol for CRDT update exchange
//! - WebSocket client with reconnect/backoff
//! - Relay server with per-room state and rebroadcast
//! - Access gate (JWT sessions, single-use invites)

pub mod gate;
pub mod protocol;
pub mod server;
pub mod transport;

pub use gate::{AccessGate, Claims, Session};
pub use protocol::RelayMessage;
pub use server::RelayState;
pub use transport::{TransportEvent, TransportHandle};
