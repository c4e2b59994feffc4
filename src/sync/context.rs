//! Session assembly
//!
//! Wires one household session together: opens the local store, restores
//! the document, starts the persistence writer, and optionally connects
//! the relay transport. Feature hooks hang off the context and share the
//! same document handle.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::doc::{self, DocHandle};
use crate::error::Result;
use crate::hooks;
use crate::relay::transport::{self, TransportHandle};
use crate::store::{open_or_memory, LocalStore, StoreWriter, StoredState};
use crate::sync::coordinator::{Coordinator, SyncSnapshot};

/// One open household session. Dropping it without [`SyncContext::close`]
/// loses no acknowledged writes but skips the final compaction.
pub struct SyncContext {
    doc: DocHandle,
    writer: StoreWriter,
    status: watch::Receiver<SyncSnapshot>,
    transport: Option<TransportHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncContext {
    /// Open the household document. With a session token the relay
    /// transport starts immediately; without one the session runs fully
    /// offline and can be reopened online later.
    pub fn open(config: &Config, household: &str, token: Option<String>) -> Result<SyncContext> {
        Self::with_store(open_or_memory(&config.storage.data_dir), config, household, token)
    }

    fn with_store(
        store: Box<dyn LocalStore>,
        config: &Config,
        household: &str,
        token: Option<String>,
    ) -> Result<SyncContext> {
        // Unreadable persisted state degrades to an empty replica; the
        // session must come up either way.
        let state = match store.load(household) {
            Ok(state) => state,
            Err(e) => {
                warn!(household, error = %e, "failed to load persisted state, starting empty");
                StoredState::default()
            }
        };

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let doc = DocHandle::new(doc::restore(&state), updates_tx)?;
        let (writer, writer_task) = StoreWriter::spawn(store, household.to_string());

        let client_id = Uuid::new_v4().simple().to_string();
        let mut tasks = vec![writer_task];

        let (transport, events, outbound) = match token {
            Some(token) => {
                let (events_tx, events_rx) = mpsc::channel(64);
                let handle =
                    transport::connect(config.relay.room_url(household), token, events_tx);
                let outbound = handle.outbound.clone();
                (Some(handle), Some(events_rx), Some(outbound))
            }
            None => (None, None, None),
        };

        let (coordinator, status) =
            Coordinator::new(doc.clone(), writer.clone(), client_id, outbound);
        tasks.push(tokio::spawn(coordinator.run(updates_rx, events)));

        Ok(SyncContext {
            doc,
            writer,
            status,
            transport,
            tasks,
        })
    }

    /// Current connection status; the receiver observes every change.
    pub fn status(&self) -> watch::Receiver<SyncSnapshot> {
        self.status.clone()
    }

    pub fn doc(&self) -> &DocHandle {
        &self.doc
    }

    pub fn users(&self) -> hooks::Users {
        hooks::Users::new(self.doc.clone())
    }

    pub fn chores(&self) -> hooks::Chores {
        hooks::Chores::new(self.doc.clone())
    }

    pub fn bills(&self) -> hooks::Bills {
        hooks::Bills::new(self.doc.clone())
    }

    pub fn shopping(&self) -> hooks::Shopping {
        hooks::Shopping::new(self.doc.clone())
    }

    pub fn calendar(&self) -> hooks::Calendar {
        hooks::Calendar::new(self.doc.clone())
    }

    pub fn messages(&self) -> hooks::Messages {
        hooks::Messages::new(self.doc.clone())
    }

    pub fn wellness(&self) -> hooks::Wellness {
        hooks::Wellness::new(self.doc.clone())
    }

    pub fn feedback(&self) -> hooks::Feedback {
        hooks::Feedback::new(self.doc.clone())
    }

    /// Flush pending writes, compact the stored state to a fresh snapshot,
    /// then stop the background tasks.
    pub async fn close(mut self) {
        if let Some(transport) = self.transport.take() {
            transport.disconnect();
        }
        self.writer.compact(self.doc.save());
        self.writer.flush().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
