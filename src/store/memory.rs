//! In-memory fallback store
//!
//! Used when the device database cannot be opened. State lives for the
//! process lifetime only; sync and the UI keep functioning.

use std::collections::HashMap;

use super::{LocalStore, StoredState};
use crate::error::Result;

#[derive(Default)]
pub struct MemoryStore {
    docs: HashMap<String, StoredState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn load(&self, doc_id: &str) -> Result<StoredState> {
        Ok(self.docs.get(doc_id).cloned().unwrap_or_default())
    }

    fn append_update(&mut self, doc_id: &str, payload: &[u8]) -> Result<()> {
        self.docs
            .entry(doc_id.to_string())
            .or_default()
            .updates
            .push(payload.to_vec());
        Ok(())
    }

    fn compact(&mut self, doc_id: &str, snapshot: &[u8]) -> Result<()> {
        let state = self.docs.entry(doc_id.to_string()).or_default();
        state.snapshot = Some(snapshot.to_vec());
        state.updates.clear();
        Ok(())
    }
}
