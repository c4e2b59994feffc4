//! Ephemeral family chat.
//!
//! Messages live for 24 hours. Expiry is a read-side filter plus a
//! best-effort sweep; replicas that never sweep still agree on what is
//! visible because the cutoff derives from the message timestamp.

use crate::doc::records::{now_ms, Message};
use crate::doc::{Container, DocHandle};
use crate::error::Result;

pub const RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

pub struct Messages {
    doc: DocHandle,
}

impl Messages {
    pub fn new(doc: DocHandle) -> Self {
        Self { doc }
    }

    /// Messages still inside the retention window, oldest first.
    pub fn all(&self) -> Vec<Message> {
        self.visible_at(now_ms())
    }

    pub fn visible_at(&self, now: i64) -> Vec<Message> {
        self.doc
            .typed_records(Container::Messages)
            .into_iter()
            .filter(|m: &Message| now - m.timestamp < RETENTION_MS)
            .collect()
    }

    pub fn send(&self, message: &Message) -> Result<()> {
        self.doc.insert(Container::Messages, message)
    }

    /// Messages past the retention cutoff still present in the document.
    pub fn expired_at(&self, now: i64) -> Vec<Message> {
        self.doc
            .typed_records(Container::Messages)
            .into_iter()
            .filter(|m: &Message| now - m.timestamp >= RETENTION_MS)
            .collect()
    }

    /// Delete expired messages from the document. Safe to run on any
    /// replica at any time; concurrent sweeps of the same message merge
    /// to a single removal.
    pub fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_at(now_ms())
    }

    pub fn sweep_expired_at(&self, now: i64) -> Result<usize> {
        let expired = self.expired_at(now);
        for message in &expired {
            self.doc.remove(Container::Messages, &message.id)?;
        }
        Ok(expired.len())
    }
}
