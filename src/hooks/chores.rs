//! Chores: assignment, completion, and rotation.

use serde_json::{json, Map as JsonMap};

use crate::doc::records::{now_ms, Chore, ChoreStatus};
use crate::doc::{Container, DocHandle};
use crate::error::{Error, Result};

pub struct Chores {
    doc: DocHandle,
}

impl Chores {
    pub fn new(doc: DocHandle) -> Self {
        Self { doc }
    }

    pub fn all(&self) -> Vec<Chore> {
        self.doc.typed_records(Container::Chores)
    }

    pub fn add(&self, chore: &Chore) -> Result<()> {
        self.doc.insert(Container::Chores, chore)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        self.doc.remove(Container::Chores, id)
    }

    /// Open chores assigned to a member.
    pub fn active_for(&self, user_id: &str) -> Vec<Chore> {
        self.all()
            .into_iter()
            .filter(|c| c.status == ChoreStatus::Open && c.assignee.as_deref() == Some(user_id))
            .collect()
    }

    /// Mark a chore done, recording who finished it and when as one
    /// atomic patch. Returns the point value so the caller can award XP.
    pub fn complete(&self, id: &str, completed_by: &str) -> Result<i64> {
        let Some(chore) = self.find(id) else {
            return Err(Error::UnknownRecord(id.to_string()));
        };
        let mut patch = JsonMap::new();
        patch.insert("status".into(), json!("done"));
        patch.insert("lastCompletedBy".into(), json!(completed_by));
        patch.insert("lastCompletedAt".into(), json!(now_ms()));
        self.doc.update(Container::Chores, id, &patch)?;
        Ok(chore.points)
    }

    /// Record the current assignee's completion and hand the chore to the
    /// next member of the roster, as one atomic patch (a replica never
    /// observes the completion without the reassignment). With the current
    /// assignee absent from the roster the rotation starts at the head.
    pub fn rotate(&self, id: &str, roster: &[String]) -> Result<()> {
        if roster.is_empty() {
            return Err(Error::EmptyRoster);
        }
        let Some(chore) = self.find(id) else {
            return Err(Error::UnknownRecord(id.to_string()));
        };
        let next = match chore
            .assignee
            .as_deref()
            .and_then(|current| roster.iter().position(|r| r == current))
        {
            Some(pos) => roster[(pos + 1) % roster.len()].clone(),
            None => roster[0].clone(),
        };
        let mut patch = JsonMap::new();
        patch.insert("status".into(), json!("open"));
        patch.insert("assignee".into(), json!(next));
        if let Some(current) = &chore.assignee {
            patch.insert("lastCompletedBy".into(), json!(current));
            patch.insert("lastCompletedAt".into(), json!(now_ms()));
        }
        self.doc.update(Container::Chores, id, &patch)
    }

    fn find(&self, id: &str) -> Option<Chore> {
        self.all().into_iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::records::new_id;

    fn chore(title: &str, assignee: Option<&str>, points: i64) -> Chore {
        Chore {
            id: new_id(),
            title: title.to_string(),
            assignee: assignee.map(str::to_string),
            points,
            status: ChoreStatus::Open,
            due_date: None,
            last_completed_by: None,
            last_completed_at: None,
            created_at: now_ms(),
        }
    }

    fn chores() -> Chores {
        let (doc, _rx) = DocHandle::detached().unwrap();
        Chores::new(doc)
    }

    #[test]
    fn complete_records_who_and_when() {
        let chores = chores();
        let c = chore("Dishes", Some("u-a"), 15);
        chores.add(&c).unwrap();

        let points = chores.complete(&c.id, "u-a").unwrap();
        assert_eq!(points, 15);

        let done = chores.all().into_iter().next().unwrap();
        assert_eq!(done.status, ChoreStatus::Done);
        assert_eq!(done.last_completed_by.as_deref(), Some("u-a"));
        assert!(done.last_completed_at.is_some());
        assert!(chores.active_for("u-a").is_empty());
    }

    #[test]
    fn rotate_records_completion_and_advances_the_roster() {
        let chores = chores();
        let c = chore("Trash", Some("u-b"), 5);
        chores.add(&c).unwrap();
        let roster = vec!["u-a".to_string(), "u-b".to_string(), "u-c".to_string()];

        chores.rotate(&c.id, &roster).unwrap();
        let after = chores.all().into_iter().next().unwrap();
        assert_eq!(after.status, ChoreStatus::Open);
        assert_eq!(after.assignee.as_deref(), Some("u-c"));
        assert_eq!(after.last_completed_by.as_deref(), Some("u-b"));
        assert!(after.last_completed_at.is_some());

        chores.rotate(&c.id, &roster).unwrap();
        let wrapped = chores.all().into_iter().next().unwrap();
        assert_eq!(wrapped.assignee.as_deref(), Some("u-a"));
        assert_eq!(wrapped.last_completed_by.as_deref(), Some("u-c"));
    }

    #[test]
    fn rotate_with_empty_roster_is_rejected() {
        let chores = chores();
        let c = chore("Mop", Some("u-a"), 5);
        chores.add(&c).unwrap();
        assert!(matches!(chores.rotate(&c.id, &[]), Err(Error::EmptyRoster)));
    }

    #[test]
    fn rotate_with_unknown_assignee_starts_at_head() {
        let chores = chores();
        let c = chore("Vacuum", Some("left-the-family"), 10);
        chores.add(&c).unwrap();
        chores
            .rotate(&c.id, &["u-a".to_string(), "u-b".to_string()])
            .unwrap();
        let after = chores.all().into_iter().next().unwrap();
        assert_eq!(after.assignee.as_deref(), Some("u-a"));
    }
}
