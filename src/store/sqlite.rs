//! SQLite-backed durable store

use std::path::Path;

use rusqlite::Connection;
use tracing::{debug, info};

use super::{LocalStore, StoredState};
use crate::error::{Error, Result};

pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    /// Open or create the device database under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", data_dir.display())))?;
        let db_path = data_dir.join("hearth.db");
        let db = Connection::open(&db_path)?;

        // WAL for concurrent read access
        db.execute_batch("PRAGMA journal_mode=WAL;")?;

        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS snapshots (
                doc_id TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );
            CREATE TABLE IF NOT EXISTS updates (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id TEXT NOT NULL,
                data BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS updates_doc ON updates (doc_id, seq);",
        )?;

        info!(path = %db_path.display(), "local store opened");
        Ok(Self { db })
    }
}

impl LocalStore for SqliteStore {
    fn load(&self, doc_id: &str) -> Result<StoredState> {
        let mut stmt = self
            .db
            .prepare_cached("SELECT data FROM snapshots WHERE doc_id = ?1")?;
        let snapshot = match stmt.query_row([doc_id], |row| row.get::<_, Vec<u8>>(0)) {
            Ok(data) => Some(data),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let mut stmt = self
            .db
            .prepare_cached("SELECT data FROM updates WHERE doc_id = ?1 ORDER BY seq")?;
        let updates = stmt
            .query_map([doc_id], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(
            doc_id,
            snapshot = snapshot.is_some(),
            pending_updates = updates.len(),
            "loaded persisted state"
        );
        Ok(StoredState { snapshot, updates })
    }

    fn append_update(&mut self, doc_id: &str, payload: &[u8]) -> Result<()> {
        self.db.execute(
            "INSERT INTO updates (doc_id, data) VALUES (?1, ?2)",
            rusqlite::params![doc_id, payload],
        )?;
        Ok(())
    }

    fn compact(&mut self, doc_id: &str, snapshot: &[u8]) -> Result<()> {
        let tx = self.db.transaction()?;
        tx.execute(
            "INSERT INTO snapshots (doc_id, data, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))
             ON CONFLICT(doc_id) DO UPDATE SET data = ?2, updated_at = strftime('%s', 'now')",
            rusqlite::params![doc_id, snapshot],
        )?;
        tx.execute("DELETE FROM updates WHERE doc_id = ?1", [doc_id])?;
        tx.commit()?;
        debug!(doc_id, bytes = snapshot.len(), "compacted document");
        Ok(())
    }
}
