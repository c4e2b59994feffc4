//! Sync coordinator
//!
//! Routes local updates to persistence and the relay, merges remote
//! updates into the document, and drives the connection status machine:
//! Offline -> Connecting -> Syncing -> Online, back to Offline on any
//! socket error. Local writes succeed in every state; offline is a valid
//! start and end state.

use std::fmt;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::doc::{DocHandle, LocalUpdate};
use crate::relay::protocol::RelayMessage;
use crate::relay::transport::TransportEvent;
use crate::store::StoreWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Offline,
    Connecting,
    /// Connected, reconciliation exchange in flight.
    Syncing,
    /// Connected steady-state.
    Online,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Offline => "offline",
            SyncStatus::Connecting => "connecting",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Online => "online",
        };
        write!(f, "{s}")
    }
}

/// Status surface exposed to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub status: SyncStatus,
    pub peer_count: usize,
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        Self {
            status: SyncStatus::Offline,
            peer_count: 0,
        }
    }
}

pub struct Coordinator {
    doc: DocHandle,
    writer: StoreWriter,
    client_id: String,
    outbound: Option<mpsc::UnboundedSender<RelayMessage>>,
    status: watch::Sender<SyncSnapshot>,
}

impl Coordinator {
    pub fn new(
        doc: DocHandle,
        writer: StoreWriter,
        client_id: String,
        outbound: Option<mpsc::UnboundedSender<RelayMessage>>,
    ) -> (Self, watch::Receiver<SyncSnapshot>) {
        let (status, status_rx) = watch::channel(SyncSnapshot::default());
        (
            Self {
                doc,
                writer,
                client_id,
                outbound,
                status,
            },
            status_rx,
        )
    }

    /// Run until the document or transport goes away. Without a transport
    /// the coordinator only persists local updates (fully offline mode).
    pub async fn run(
        mut self,
        mut local: mpsc::UnboundedReceiver<LocalUpdate>,
        transport: Option<mpsc::Receiver<TransportEvent>>,
    ) {
        match transport {
            None => {
                while let Some(update) = local.recv().await {
                    self.writer.append(update.payload);
                }
            }
            Some(mut events) => loop {
                tokio::select! {
                    update = local.recv() => match update {
                        Some(update) => self.on_local(update),
                        None => break,
                    },
                    event = events.recv() => match event {
                        Some(event) => {
                            if !self.on_transport(event) {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            },
        }
        self.set_status(SyncStatus::Offline);
    }

    fn on_local(&mut self, update: LocalUpdate) {
        self.writer.append(update.payload.clone());
        if matches!(
            self.status.borrow().status,
            SyncStatus::Syncing | SyncStatus::Online
        ) {
            self.send(RelayMessage::Update {
                origin: self.client_id.clone(),
                payload: update.payload,
            });
        }
    }

    /// Returns false when the session must end (terminal auth rejection).
    fn on_transport(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Connecting => self.set_status(SyncStatus::Connecting),
            TransportEvent::Connected => {
                self.set_status(SyncStatus::Syncing);
                self.send(RelayMessage::Hello {
                    client_id: self.client_id.clone(),
                    heads: self.doc.heads(),
                });
            }
            TransportEvent::Disconnected => {
                self.status.send_modify(|s| {
                    s.status = SyncStatus::Offline;
                    s.peer_count = 0;
                });
            }
            TransportEvent::AuthRejected(reason) => {
                error!(reason, "relay rejected session, going offline");
                self.status.send_modify(|s| {
                    s.status = SyncStatus::Offline;
                    s.peer_count = 0;
                });
                return false;
            }
            TransportEvent::Message(msg) => self.on_message(msg),
        }
        true
    }

    fn on_message(&mut self, msg: RelayMessage) {
        match msg {
            RelayMessage::HelloAck { peer_count } => {
                self.status.send_modify(|s| s.peer_count = peer_count);
            }
            RelayMessage::SyncResponse { changes } => {
                for payload in changes {
                    if self.doc.apply_remote(&payload) {
                        self.writer.append(payload);
                    }
                }
                info!("reconciliation complete");
                self.set_status(SyncStatus::Online);
            }
            RelayMessage::SyncRequest { heads } => {
                let missing = self.doc.changes_since(&heads);
                let changes = if missing.is_empty() { vec![] } else { vec![missing] };
                self.send(RelayMessage::SyncResponse { changes });
            }
            RelayMessage::Update { origin, payload } => {
                // Our own update echoed through the relay; already applied.
                if origin == self.client_id {
                    return;
                }
                if self.doc.apply_remote(&payload) {
                    self.writer.append(payload);
                }
            }
            RelayMessage::PeerCount { count } => {
                self.status.send_modify(|s| s.peer_count = count);
            }
            other => debug!(?other, "ignoring unexpected relay frame"),
        }
    }

    fn send(&self, msg: RelayMessage) {
        if let Some(outbound) = &self.outbound {
            let _ = outbound.send(msg);
        }
    }

    fn set_status(&self, status: SyncStatus) {
        self.status.send_modify(|s| s.status = status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::records::{new_id, now_ms, Chore, ChoreStatus};
    use crate::doc::Container;
    use crate::store::MemoryStore;

    fn chore(title: &str) -> Chore {
        Chore {
            id: new_id(),
            title: title.to_string(),
            assignee: None,
            points: 0,
            status: ChoreStatus::Open,
            due_date: None,
            last_completed_by: None,
            last_completed_at: None,
            created_at: now_ms(),
        }
    }

    #[tokio::test]
    async fn status_walks_through_syncing_to_online() {
        let (doc, local_rx) = DocHandle::detached().unwrap();
        let (writer, _writer_task) =
            StoreWriter::spawn(Box::new(MemoryStore::new()), "fam".to_string());
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::channel(16);

        let (coordinator, mut status) =
            Coordinator::new(doc.clone(), writer, "me".to_string(), Some(out_tx));
        let task = tokio::spawn(coordinator.run(local_rx, Some(ev_rx)));

        assert_eq!(status.borrow().status, SyncStatus::Offline);

        ev_tx.send(TransportEvent::Connecting).await.unwrap();
        status.changed().await.unwrap();
        assert_eq!(status.borrow().status, SyncStatus::Connecting);

        ev_tx.send(TransportEvent::Connected).await.unwrap();
        status.changed().await.unwrap();
        assert_eq!(status.borrow().status, SyncStatus::Syncing);

        // Connected sends Hello with our heads.
        let hello = out_rx.recv().await.unwrap();
        assert!(matches!(hello, RelayMessage::Hello { .. }));

        ev_tx
            .send(TransportEvent::Message(RelayMessage::SyncResponse {
                changes: vec![],
            }))
            .await
            .unwrap();
        status.changed().await.unwrap();
        assert_eq!(status.borrow().status, SyncStatus::Online);

        ev_tx.send(TransportEvent::Disconnected).await.unwrap();
        status.changed().await.unwrap();
        assert_eq!(status.borrow().status, SyncStatus::Offline);
        assert_eq!(status.borrow().peer_count, 0);

        task.abort();
    }

    #[tokio::test]
    async fn own_echo_is_suppressed() {
        let (doc, local_rx) = DocHandle::detached().unwrap();
        let (writer, _writer_task) =
            StoreWriter::spawn(Box::new(MemoryStore::new()), "fam".to_string());
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::channel(16);

        let (coordinator, _status) =
            Coordinator::new(doc.clone(), writer, "me".to_string(), Some(out_tx));
        let task = tokio::spawn(coordinator.run(local_rx, Some(ev_rx)));

        // An Update frame carrying our own origin must not be re-applied.
        ev_tx
            .send(TransportEvent::Message(RelayMessage::Update {
                origin: "me".to_string(),
                payload: b"would be corrupt if applied".to_vec(),
            }))
            .await
            .unwrap();

        // A corrupt payload from someone else is dropped without panicking.
        ev_tx
            .send(TransportEvent::Message(RelayMessage::Update {
                origin: "them".to_string(),
                payload: b"garbage".to_vec(),
            }))
            .await
            .unwrap();

        tokio::task::yield_now().await;
        assert!(doc.records(Container::Chores).is_empty());
        task.abort();
    }

    #[tokio::test]
    async fn auth_rejection_is_terminal() {
        let (doc, local_rx) = DocHandle::detached().unwrap();
        let (writer, _writer_task) =
            StoreWriter::spawn(Box::new(MemoryStore::new()), "fam".to_string());
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::channel(16);

        let (coordinator, status) =
            Coordinator::new(doc.clone(), writer, "me".to_string(), Some(out_tx));
        let task = tokio::spawn(coordinator.run(local_rx, Some(ev_rx)));

        ev_tx
            .send(TransportEvent::AuthRejected("expired".to_string()))
            .await
            .unwrap();

        // The run loop exits on its own; local writes still work.
        task.await.unwrap();
        assert_eq!(status.borrow().status, SyncStatus::Offline);
        doc.insert(Container::Chores, &chore("still works")).unwrap();
        assert_eq!(doc.records(Container::Chores).len(), 1);
    }
}
