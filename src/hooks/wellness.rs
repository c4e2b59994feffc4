//! Wellness check-ins and anonymous-ish feedback.

use crate::doc::records::{FeedbackEntry, WellnessEntry};
use crate::doc::{Container, DocHandle};
use crate::error::Result;

pub struct Wellness {
    doc: DocHandle,
}

impl Wellness {
    pub fn new(doc: DocHandle) -> Self {
        Self { doc }
    }

    pub fn all(&self) -> Vec<WellnessEntry> {
        self.doc.typed_records(Container::WellnessEntries)
    }

    pub fn record(&self, entry: &WellnessEntry) -> Result<()> {
        self.doc.insert(Container::WellnessEntries, entry)
    }

    /// Check-ins for one member, newest first.
    pub fn entries_for(&self, user_id: &str) -> Vec<WellnessEntry> {
        let mut entries: Vec<WellnessEntry> = self
            .all()
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        entries
    }
}

pub struct Feedback {
    doc: DocHandle,
}

impl Feedback {
    pub fn new(doc: DocHandle) -> Self {
        Self { doc }
    }

    pub fn all(&self) -> Vec<FeedbackEntry> {
        self.doc.typed_records(Container::Feedback)
    }

    pub fn submit(&self, entry: &FeedbackEntry) -> Result<()> {
        self.doc.insert(Container::Feedback, entry)
    }
}
