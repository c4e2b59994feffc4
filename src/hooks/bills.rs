//! Bills and the shared shopping list.

use serde_json::{json, Map as JsonMap};

use crate::doc::records::{now_ms, Bill, ShoppingItem};
use crate::doc::{Container, DocHandle};
use crate::error::{Error, Result};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub struct Bills {
    doc: DocHandle,
}

impl Bills {
    pub fn new(doc: DocHandle) -> Self {
        Self { doc }
    }

    pub fn all(&self) -> Vec<Bill> {
        self.doc.typed_records(Container::Bills)
    }

    pub fn add(&self, bill: &Bill) -> Result<()> {
        self.doc.insert(Container::Bills, bill)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        self.doc.remove(Container::Bills, id)
    }

    pub fn unpaid(&self) -> Vec<Bill> {
        self.all().into_iter().filter(|b| !b.paid).collect()
    }

    /// Unpaid bills due within the next `days` days, soonest first.
    /// Bills without a due date never appear here.
    pub fn due_within(&self, days: i64) -> Vec<Bill> {
        let now = now_ms();
        let horizon = now + days * DAY_MS;
        let mut due: Vec<Bill> = self
            .unpaid()
            .into_iter()
            .filter(|b| b.due_date.is_some_and(|d| d <= horizon))
            .collect();
        due.sort_by_key(|b| b.due_date);
        due
    }

    pub fn mark_paid(&self, id: &str) -> Result<()> {
        let mut patch = JsonMap::new();
        patch.insert("paid".into(), json!(true));
        self.doc.update(Container::Bills, id, &patch)
    }
}

pub struct Shopping {
    doc: DocHandle,
}

impl Shopping {
    pub fn new(doc: DocHandle) -> Self {
        Self { doc }
    }

    pub fn all(&self) -> Vec<ShoppingItem> {
        self.doc.typed_records(Container::ShoppingItems)
    }

    pub fn add(&self, item: &ShoppingItem) -> Result<()> {
        self.doc.insert(Container::ShoppingItems, item)
    }

    /// Flip an item between done and pending.
    pub fn toggle(&self, id: &str) -> Result<()> {
        let Some(item) = self.all().into_iter().find(|i| i.id == id) else {
            return Err(Error::UnknownRecord(id.to_string()));
        };
        let mut patch = JsonMap::new();
        patch.insert("done".into(), json!(!item.done));
        self.doc.update(Container::ShoppingItems, id, &patch)
    }

    /// Delete every checked-off item.
    pub fn clear_done(&self) -> Result<()> {
        for item in self.all().into_iter().filter(|i| i.done) {
            self.doc.remove(Container::ShoppingItems, &item.id)?;
        }
        Ok(())
    }
}
