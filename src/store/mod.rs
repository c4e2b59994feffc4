//! Durable local store
//!
//! Persists the household document as an opaque snapshot blob plus an
//! ordered tail of incremental updates, keyed by household id. When the
//! device database cannot be opened (test environments, quota), the store
//! degrades to memory-only operation with a single warning instead of
//! failing the session.

mod memory;
mod sqlite;
pub mod writer;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use writer::StoreWriter;

use std::path::Path;

use tracing::warn;

use crate::error::Result;

/// Persisted form of one household document.
#[derive(Debug, Clone, Default)]
pub struct StoredState {
    pub snapshot: Option<Vec<u8>>,
    /// Incremental updates in submission order, not yet compacted.
    pub updates: Vec<Vec<u8>>,
}

/// Pluggable persistence seam; the document treats payloads as opaque.
pub trait LocalStore: Send {
    /// State recoverable at startup. Every acknowledged mutation that was
    /// flushed is present; order of `updates` matches submission order.
    fn load(&self, doc_id: &str) -> Result<StoredState>;

    /// Append one incremental update.
    fn append_update(&mut self, doc_id: &str, payload: &[u8]) -> Result<()>;

    /// Replace the snapshot with `snapshot` and drop the replayed tail.
    fn compact(&mut self, doc_id: &str, snapshot: &[u8]) -> Result<()>;
}

/// Open the on-device database, degrading to in-memory operation when
/// persistence is unavailable.
pub fn open_or_memory(data_dir: &Path) -> Box<dyn LocalStore> {
    match SqliteStore::open(data_dir) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!(error = %e, "local persistence unavailable, continuing in memory only");
            Box::new(MemoryStore::new())
        }
    }
}
