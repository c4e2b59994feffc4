//! Sync session layer: coordinator state machine and session assembly.

pub mod context;
pub mod coordinator;

pub use context::SyncContext;
pub use coordinator::{Coordinator, SyncSnapshot, SyncStatus};
