//! Ordered asynchronous persistence
//!
//! A single writer task owns the store; commands arrive over a channel so
//! updates hit disk asynchronously but strictly in submission order. A
//! persistence failure is logged and the session continues (the in-memory
//! replica stays authoritative until the next successful compaction).

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use super::LocalStore;

enum StoreCommand {
    Append(Vec<u8>),
    Compact(Vec<u8>),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl StoreWriter {
    /// Spawn the writer task for one household document.
    pub fn spawn(mut store: Box<dyn LocalStore>, doc_id: String) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    StoreCommand::Append(payload) => {
                        if let Err(e) = store.append_update(&doc_id, &payload) {
                            warn!(doc_id, error = %e, "failed to persist update");
                        }
                    }
                    StoreCommand::Compact(snapshot) => {
                        if let Err(e) = store.compact(&doc_id, &snapshot) {
                            warn!(doc_id, error = %e, "failed to compact document");
                        }
                    }
                    StoreCommand::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        (Self { tx }, task)
    }

    pub fn append(&self, payload: Vec<u8>) {
        let _ = self.tx.send(StoreCommand::Append(payload));
    }

    pub fn compact(&self, snapshot: Vec<u8>) {
        let _ = self.tx.send(StoreCommand::Compact(snapshot));
    }

    /// Wait until every previously submitted write has been processed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(StoreCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}
