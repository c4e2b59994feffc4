//! hearth-sync: Local-first synchronization core for the Hearth family organizer
//!
//! Every device holds a full replica of its household document and works
//! offline indefinitely; a lightweight relay fans merged updates out to
//! whoever is connected. The crate provides:
//! - The replicated household document with named feature containers
//! - Durable local persistence (snapshot plus ordered update tail)
//! - The relay transport with backoff reconnect, and the relay server
//! - The sync coordinator and per-feature hooks for app layers
//!
//! See README.md for the protocol walkthrough.

pub mod config;
pub mod doc;
pub mod error;
pub mod hooks;
pub mod relay;
pub mod store;
pub mod sync;

pub use config::Config;
pub use doc::{Container, DocHandle};
pub use error::{Error, Result};
pub use sync::{SyncContext, SyncSnapshot, SyncStatus};
