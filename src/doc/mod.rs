//! The replicated household document
//!
//! One Automerge document per household, with a fixed set of named
//! top-level containers (one per feature area). Mutations apply to the
//! local replica synchronously; every commit emits an incremental update
//! for persistence and replication. Remote updates merge through
//! [`DocHandle::apply_remote`], which drops corrupt payloads instead of
//! crashing.

pub mod records;
pub mod value;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use automerge::transaction::{CommitOptions, Transactable};
use automerge::{
    ActorId, AutoCommit, Automerge, AutomergeError, ChangeHash, ObjId, ObjType, ReadDoc, Value,
    ROOT,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::StoredState;

/// Named top-level containers of the household document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    Users,
    Chores,
    Bills,
    ShoppingItems,
    CalendarEvents,
    Messages,
    WellnessEntries,
    Feedback,
}

impl Container {
    pub const ALL: [Container; 8] = [
        Container::Users,
        Container::Chores,
        Container::Bills,
        Container::ShoppingItems,
        Container::CalendarEvents,
        Container::Messages,
        Container::WellnessEntries,
        Container::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Container::Users => "users",
            Container::Chores => "chores",
            Container::Bills => "bills",
            Container::ShoppingItems => "shoppingItems",
            Container::CalendarEvents => "calendarEvents",
            Container::Messages => "messages",
            Container::WellnessEntries => "wellnessEntries",
            Container::Feedback => "feedback",
        }
    }

    /// Users is a map keyed by user id; everything else is an ordered list.
    fn obj_type(&self) -> ObjType {
        match self {
            Container::Users => ObjType::Map,
            _ => ObjType::List,
        }
    }
}

/// A local-origin incremental change, ready for persistence and relay.
#[derive(Debug, Clone)]
pub struct LocalUpdate {
    pub payload: Vec<u8>,
}

/// Actor id used for the deterministic container-bootstrap commit. Every
/// replica produces a byte-identical bootstrap change, so concurrent
/// first-runs of the same household merge into one set of containers.
const BOOTSTRAP_ACTOR: &[u8] = b"hearth-bootstrap";

/// Handle to the shared document. Cheap to clone; all clones share the
/// same replica, change notifier, and update stream.
#[derive(Clone)]
pub struct DocHandle {
    inner: Arc<Mutex<AutoCommit>>,
    changes: broadcast::Sender<Container>,
    updates: mpsc::UnboundedSender<LocalUpdate>,
}

impl DocHandle {
    pub fn new(doc: AutoCommit, updates: mpsc::UnboundedSender<LocalUpdate>) -> Result<Self> {
        let (changes, _) = broadcast::channel(256);
        let handle = Self {
            inner: Arc::new(Mutex::new(doc)),
            changes,
            updates,
        };
        handle.bootstrap_containers()?;
        Ok(handle)
    }

    /// Handle with a fresh document and a receiver for its update stream.
    /// Primarily for tests and offline-only use.
    pub fn detached() -> Result<(Self, mpsc::UnboundedReceiver<LocalUpdate>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((Self::new(AutoCommit::new(), tx)?, rx))
    }

    fn doc(&self) -> MutexGuard<'_, AutoCommit> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create missing containers with a deterministic actor and commit
    /// time, then switch to a random per-session actor.
    fn bootstrap_containers(&self) -> Result<()> {
        let mut doc = self.doc();
        let missing: Vec<Container> = Container::ALL
            .iter()
            .copied()
            .filter(|c| !matches!(doc.get(ROOT, c.as_str()), Ok(Some(_))))
            .collect();
        if !missing.is_empty() {
            doc.set_actor(ActorId::from(BOOTSTRAP_ACTOR));
            for c in missing {
                doc.put_object(ROOT, c.as_str(), c.obj_type())?;
            }
            doc.commit_with(CommitOptions::default().with_time(0));
        }
        doc.set_actor(ActorId::random());
        Ok(())
    }

    /// Append a record to a list container. The record must serialize to a
    /// map and should carry its own unique id.
    pub fn insert(&self, container: Container, record: &impl Serialize) -> Result<()> {
        let fields = to_field_map(record)?;
        let mut doc = self.doc();
        let list = container_obj(&mut doc, container)?;
        let index = doc.length(&list);
        let item = doc.insert_object(&list, index, ObjType::Map)?;
        value::write_map(&mut doc, &item, &fields)?;
        let payload = doc.save_incremental();
        drop(doc);
        self.committed(container, payload);
        Ok(())
    }

    /// Create or overwrite a keyed entry in a map container.
    pub fn upsert(&self, container: Container, id: &str, record: &impl Serialize) -> Result<()> {
        let fields = to_field_map(record)?;
        let mut doc = self.doc();
        let map = container_obj(&mut doc, container)?;
        let entry = match doc.get(&map, id)? {
            Some((Value::Object(ObjType::Map), existing)) => existing,
            _ => doc.put_object(&map, id, ObjType::Map)?,
        };
        value::write_map(&mut doc, &entry, &fields)?;
        let payload = doc.save_incremental();
        drop(doc);
        self.committed(container, payload);
        Ok(())
    }

    /// Patch fields of an existing record. The whole patch commits as one
    /// change, so multi-field domain actions are atomic.
    pub fn update(
        &self,
        container: Container,
        id: &str,
        patch: &JsonMap<String, JsonValue>,
    ) -> Result<()> {
        let mut doc = self.doc();
        let obj = container_obj(&mut doc, container)?;
        let target = match container.obj_type() {
            ObjType::Map => match doc.get(&obj, id)? {
                Some((Value::Object(ObjType::Map), entry)) => Some(entry),
                _ => None,
            },
            _ => find_by_id(&doc, &obj, id)?.map(|(_, item)| item),
        };
        let Some(target) = target else {
            return Err(Error::UnknownRecord(id.to_string()));
        };
        value::write_map(&mut doc, &target, patch)?;
        let payload = doc.save_incremental();
        drop(doc);
        self.committed(container, payload);
        Ok(())
    }

    /// Remove a record. Removing an id that is already gone is a no-op.
    pub fn remove(&self, container: Container, id: &str) -> Result<()> {
        let mut doc = self.doc();
        let obj = container_obj(&mut doc, container)?;
        let removed = match container.obj_type() {
            ObjType::Map => {
                if doc.get(&obj, id)?.is_some() {
                    doc.delete(&obj, id)?;
                    true
                } else {
                    false
                }
            }
            _ => {
                if let Some((index, _)) = find_by_id(&doc, &obj, id)? {
                    doc.delete(&obj, index)?;
                    true
                } else {
                    false
                }
            }
        };
        if !removed {
            return Ok(());
        }
        let payload = doc.save_incremental();
        drop(doc);
        self.committed(container, payload);
        Ok(())
    }

    /// Append a scalar to a record's list-valued field, creating the list
    /// if needed. Values already present are skipped, so the operation is
    /// idempotent (recurrence exceptions rely on this).
    pub fn push_field_value(
        &self,
        container: Container,
        id: &str,
        field: &str,
        value: &JsonValue,
    ) -> Result<()> {
        let mut doc = self.doc();
        let obj = container_obj(&mut doc, container)?;
        let target = match container.obj_type() {
            ObjType::Map => match doc.get(&obj, id)? {
                Some((Value::Object(ObjType::Map), entry)) => Some(entry),
                _ => None,
            },
            _ => find_by_id(&doc, &obj, id)?.map(|(_, item)| item),
        };
        let Some(target) = target else {
            return Err(Error::UnknownRecord(id.to_string()));
        };
        let list = match doc.get(&target, field)? {
            Some((Value::Object(ObjType::List), list)) => list,
            _ => doc.put_object(&target, field, ObjType::List)?,
        };
        let existing = value::hydrate(&doc, &list, ObjType::List)?;
        if let JsonValue::Array(items) = &existing {
            if items.contains(value) {
                return Ok(());
            }
        }
        let index = doc.length(&list);
        match value {
            JsonValue::Object(map) => {
                let inner = doc.insert_object(&list, index, ObjType::Map)?;
                value::write_map(&mut doc, &inner, map)?;
            }
            JsonValue::Array(items) => {
                let inner = doc.insert_object(&list, index, ObjType::List)?;
                value::write_list(&mut doc, &inner, items)?;
            }
            other => doc.insert(&list, index, value::to_scalar(other))?,
        }
        let payload = doc.save_incremental();
        drop(doc);
        self.committed(container, payload);
        Ok(())
    }

    /// All records of a container, in converged order. Map containers are
    /// returned in key order (deterministic across replicas).
    pub fn records(&self, container: Container) -> Vec<JsonValue> {
        let doc = self.doc();
        match collect(&doc, container) {
            Ok(values) => values,
            Err(e) => {
                warn!(container = container.as_str(), error = %e, "failed to read container");
                Vec::new()
            }
        }
    }

    /// Typed view of a container; records that no longer deserialize are
    /// skipped rather than failing the whole read.
    pub fn typed_records<T: DeserializeOwned>(&self, container: Container) -> Vec<T> {
        self.records(container)
            .into_iter()
            .filter_map(|v| match serde_json::from_value(v) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(container = container.as_str(), error = %e, "skipping malformed record");
                    None
                }
            })
            .collect()
    }

    /// Merge a remote incremental update. Returns false (after logging)
    /// when the payload is corrupt; local state is untouched in that case.
    pub fn apply_remote(&self, payload: &[u8]) -> bool {
        if !valid_payload(payload) {
            warn!(bytes = payload.len(), "dropping corrupt update payload");
            return false;
        }
        let mut doc = self.doc();
        match doc.load_incremental(payload) {
            Ok(_) => {
                drop(doc);
                for container in Container::ALL {
                    let _ = self.changes.send(container);
                }
                true
            }
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "dropping corrupt update payload");
                false
            }
        }
    }

    /// Current heads, hex-encoded for the wire.
    pub fn heads(&self) -> Vec<String> {
        self.doc().get_heads().iter().map(|h| h.to_string()).collect()
    }

    /// Full document snapshot (compaction and full-state sync).
    pub fn save(&self) -> Vec<u8> {
        self.doc().save()
    }

    /// Changes a peer with the given heads is missing. Unknown or absent
    /// heads fall back to the full document.
    pub fn changes_since(&self, heads: &[String]) -> Vec<u8> {
        let mut doc = self.doc();
        let parsed = decode_heads(heads);
        if parsed.is_empty() {
            return doc.save();
        }
        doc.save_after(&parsed)
    }

    /// Observe container changes. Each discrete update batch notifies
    /// once per container.
    pub fn subscribe(&self) -> broadcast::Receiver<Container> {
        self.changes.subscribe()
    }

    fn committed(&self, container: Container, payload: Vec<u8>) {
        if !payload.is_empty() {
            let _ = self.updates.send(LocalUpdate { payload });
        }
        let _ = self.changes.send(container);
    }
}

/// Rebuild a document from a persisted snapshot plus its ordered update
/// tail. Corrupt tail entries are dropped with a warning.
pub fn restore(state: &StoredState) -> AutoCommit {
    let mut doc = match &state.snapshot {
        Some(bytes) => match AutoCommit::load(bytes) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "persisted snapshot unreadable, starting fresh");
                AutoCommit::new()
            }
        },
        None => AutoCommit::new(),
    };
    for update in &state.updates {
        if let Err(e) = doc.load_incremental(update) {
            warn!(error = %e, "skipping corrupt persisted update");
        }
    }
    doc
}

/// Vet an update payload before merging it. `load_incremental` skips
/// unparseable chunks and reports success, so parsing into a scratch
/// document is the only reliable rejection point. Valid changes with
/// unmet dependencies still parse (automerge queues them), so reordered
/// delivery is not rejected here.
pub(crate) fn valid_payload(payload: &[u8]) -> bool {
    !payload.is_empty() && Automerge::load(payload).is_ok()
}

pub(crate) fn decode_heads(heads: &[String]) -> Vec<ChangeHash> {
    let mut parsed = Vec::with_capacity(heads.len());
    for head in heads {
        if let Ok(bytes) = hex_decode(head) {
            if bytes.len() == 32 {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                parsed.push(ChangeHash(arr));
            }
        }
    }
    parsed
}

fn container_obj(
    doc: &mut AutoCommit,
    container: Container,
) -> std::result::Result<ObjId, AutomergeError> {
    if let Some((Value::Object(_), id)) = doc.get(ROOT, container.as_str())? {
        return Ok(id);
    }
    doc.put_object(ROOT, container.as_str(), container.obj_type())
}

fn find_by_id(
    doc: &AutoCommit,
    list: &ObjId,
    id: &str,
) -> std::result::Result<Option<(usize, ObjId)>, AutomergeError> {
    for i in 0..doc.length(list) {
        if let Some((Value::Object(ObjType::Map), item)) = doc.get(list, i)? {
            if let Some((val, _)) = doc.get(&item, "id")? {
                if val.to_str() == Some(id) {
                    return Ok(Some((i, item)));
                }
            }
        }
    }
    Ok(None)
}

fn collect(doc: &AutoCommit, container: Container) -> std::result::Result<Vec<JsonValue>, AutomergeError> {
    let Some((Value::Object(ty), obj)) = doc.get(ROOT, container.as_str())? else {
        return Ok(Vec::new());
    };
    match ty {
        ObjType::Map => {
            let keys: Vec<String> = doc.keys(&obj).collect();
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some((Value::Object(entry_ty), entry)) = doc.get(&obj, key.as_str())? {
                    out.push(value::hydrate(doc, &entry, entry_ty)?);
                }
            }
            Ok(out)
        }
        _ => match value::hydrate(doc, &obj, ty)? {
            JsonValue::Array(items) => Ok(items),
            other => Ok(vec![other]),
        },
    }
}

fn to_field_map(record: &impl Serialize) -> Result<JsonMap<String, JsonValue>> {
    let value = serde_json::to_value(record).map_err(|e| Error::Encoding(e.to_string()))?;
    match value {
        JsonValue::Object(map) => Ok(map),
        _ => Err(Error::Encoding("record must serialize to a map".to_string())),
    }
}

fn hex_decode(s: &str) -> std::result::Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::records::*;
    use super::*;
    use serde_json::json;

    fn chore(title: &str) -> Chore {
        Chore {
            id: new_id(),
            title: title.to_string(),
            assignee: None,
            points: 5,
            status: ChoreStatus::Open,
            due_date: None,
            last_completed_by: None,
            last_completed_at: None,
            created_at: now_ms(),
        }
    }

    #[test]
    fn insert_and_read_back() {
        let (doc, _updates) = DocHandle::detached().unwrap();
        let c = chore("Dishes");
        doc.insert(Container::Chores, &c).unwrap();

        let chores: Vec<Chore> = doc.typed_records(Container::Chores);
        assert_eq!(chores.len(), 1);
        assert_eq!(chores[0], c);
    }

    #[test]
    fn update_patches_fields_in_place() {
        let (doc, _updates) = DocHandle::detached().unwrap();
        let c = chore("Vacuum");
        doc.insert(Container::Chores, &c).unwrap();

        let patch = json!({"status": "done", "assignee": "u-2"});
        doc.update(Container::Chores, &c.id, patch.as_object().unwrap())
            .unwrap();

        let chores: Vec<Chore> = doc.typed_records(Container::Chores);
        assert_eq!(chores[0].status, ChoreStatus::Done);
        assert_eq!(chores[0].assignee.as_deref(), Some("u-2"));
        assert_eq!(chores[0].title, "Vacuum");
    }

    #[test]
    fn update_unknown_id_is_rejected() {
        let (doc, _updates) = DocHandle::detached().unwrap();
        let patch = json!({"status": "done"});
        let err = doc
            .update(Container::Chores, "no-such-id", patch.as_object().unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownRecord(_)));
    }

    #[test]
    fn remove_is_idempotent() {
        let (doc, _updates) = DocHandle::detached().unwrap();
        let c = chore("Trash");
        doc.insert(Container::Chores, &c).unwrap();
        doc.remove(Container::Chores, &c.id).unwrap();
        doc.remove(Container::Chores, &c.id).unwrap();
        assert!(doc.records(Container::Chores).is_empty());
    }

    #[test]
    fn upsert_keyed_profile() {
        let (doc, _updates) = DocHandle::detached().unwrap();
        let user = UserProfile {
            id: "u-1".into(),
            name: "Maya".into(),
            role: "parent".into(),
            avatar: None,
            xp: 120,
            level: 2,
            streaks: 4,
        };
        doc.upsert(Container::Users, &user.id, &user).unwrap();

        let users: Vec<UserProfile> = doc.typed_records(Container::Users);
        assert_eq!(users, vec![user]);
    }

    #[test]
    fn mutations_emit_ordered_updates() {
        let (doc, mut updates) = DocHandle::detached().unwrap();
        doc.insert(Container::Chores, &chore("One")).unwrap();
        doc.insert(Container::Chores, &chore("Two")).unwrap();

        let first = updates.try_recv().expect("first update");
        let second = updates.try_recv().expect("second update");
        assert!(!first.payload.is_empty());
        assert!(!second.payload.is_empty());
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn corrupt_payload_is_dropped() {
        let (doc, _updates) = DocHandle::detached().unwrap();
        doc.insert(Container::Chores, &chore("Keep me")).unwrap();

        assert!(!doc.apply_remote(b"definitely not an automerge change"));
        assert_eq!(doc.records(Container::Chores).len(), 1);
    }

    #[test]
    fn truncated_payload_is_dropped() {
        let (doc, mut updates) = DocHandle::detached().unwrap();
        doc.insert(Container::Chores, &chore("Keep me")).unwrap();
        let real = updates.try_recv().unwrap().payload;

        // Valid chunk header, mangled body.
        let mut truncated = real.clone();
        truncated.truncate(real.len() - 1);
        assert!(!doc.apply_remote(&truncated));
        assert!(!doc.apply_remote(&[]));
        assert_eq!(doc.records(Container::Chores).len(), 1);
    }

    #[test]
    fn bootstrap_converges_across_fresh_replicas() {
        let (a, mut a_updates) = DocHandle::detached().unwrap();
        let (b, _b_updates) = DocHandle::detached().unwrap();

        a.insert(Container::Chores, &chore("From A")).unwrap();
        let update = a_updates.try_recv().unwrap();
        assert!(b.apply_remote(&update.payload));

        let on_b: Vec<Chore> = b.typed_records(Container::Chores);
        assert_eq!(on_b.len(), 1);
        assert_eq!(on_b[0].title, "From A");
    }

    #[test]
    fn restore_replays_update_tail() {
        let (doc, mut updates) = DocHandle::detached().unwrap();
        doc.insert(Container::Bills, &json!({"id": "b-1", "name": "Rent", "amount": 1200.0, "createdAt": 1}))
            .unwrap();
        let u1 = updates.try_recv().unwrap();
        doc.insert(Container::Bills, &json!({"id": "b-2", "name": "Power", "amount": 80.0, "createdAt": 2}))
            .unwrap();
        let u2 = updates.try_recv().unwrap();

        let state = StoredState {
            snapshot: None,
            updates: vec![u1.payload, u2.payload],
        };
        let restored = restore(&state);
        let (handle, _rx) = {
            let (tx, rx) = mpsc::unbounded_channel();
            (DocHandle::new(restored, tx).unwrap(), rx)
        };
        assert_eq!(handle.records(Container::Bills).len(), 2);
    }
}
