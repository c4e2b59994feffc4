//! Family members, XP, and the leaderboard.

use serde_json::{json, Map as JsonMap};

use crate::doc::records::UserProfile;
use crate::doc::{Container, DocHandle};
use crate::error::Result;

/// One level per 100 XP, starting at level 1.
const XP_PER_LEVEL: i64 = 100;

pub struct Users {
    doc: DocHandle,
}

impl Users {
    pub fn new(doc: DocHandle) -> Self {
        Self { doc }
    }

    pub fn all(&self) -> Vec<UserProfile> {
        self.doc.typed_records(Container::Users)
    }

    pub fn get(&self, id: &str) -> Option<UserProfile> {
        self.all().into_iter().find(|u| u.id == id)
    }

    /// Create or replace a member profile, keyed by user id.
    pub fn upsert(&self, profile: &UserProfile) -> Result<()> {
        self.doc.upsert(Container::Users, &profile.id, profile)
    }

    /// Award XP and recompute the level in one atomic patch. Concurrent
    /// awards from two devices last-write-win rather than summing; the
    /// leaderboard treats that as acceptable per household.
    pub fn add_xp(&self, id: &str, amount: i64) -> Result<()> {
        let Some(user) = self.get(id) else {
            return Err(crate::error::Error::UnknownRecord(id.to_string()));
        };
        let xp = user.xp + amount;
        let mut patch = JsonMap::new();
        patch.insert("xp".into(), json!(xp));
        patch.insert("level".into(), json!(xp / XP_PER_LEVEL + 1));
        self.doc.update(Container::Users, id, &patch)
    }

    pub fn set_streak(&self, id: &str, streaks: i64) -> Result<()> {
        let mut patch = JsonMap::new();
        patch.insert("streaks".into(), json!(streaks));
        self.doc.update(Container::Users, id, &patch)
    }

    /// Members ordered by XP, highest first. The sort is stable, so
    /// replicas holding the same profiles render the same ranking even
    /// when scores tie.
    pub fn family_leaderboard(&self) -> Vec<UserProfile> {
        let mut users = self.all();
        users.sort_by(|a, b| b.xp.cmp(&a.xp));
        users
    }
}
