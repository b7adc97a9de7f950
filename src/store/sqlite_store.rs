use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::{RecordStore, SettingsStore, StoreError};
use crate::db::{self, DatabaseError};
use crate::models::{now_utc, ScreeningRecord, ScreeningStats, SyncCandidate, SyncUpdate};

/// SQLite-backed store. One connection, serialized behind a mutex, so every
/// write to a record's sync fields is mutually exclusive.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = db::open_database(path)?;
        tracing::info!(path = %path.display(), "Record store opened");
        Ok(Self::from_connection(conn))
    }

    /// In-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(db::open_memory_database()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Storage(DatabaseError::LockPoisoned))
    }
}

fn not_found_as(id: &Uuid, err: DatabaseError) -> StoreError {
    match err {
        DatabaseError::NotFound { .. } => StoreError::NotFound(*id),
        other => StoreError::Storage(other),
    }
}

impl RecordStore for SqliteStore {
    fn append(&self, record: &ScreeningRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        db::insert_record(&conn, record)?;
        tracing::debug!(record_id = %record.id, "Screening record appended");
        Ok(())
    }

    fn get(&self, id: &Uuid) -> Result<ScreeningRecord, StoreError> {
        let conn = self.conn()?;
        db::get_record(&conn, id)?.ok_or(StoreError::NotFound(*id))
    }

    fn list_all(&self) -> Result<Vec<ScreeningRecord>, StoreError> {
        let conn = self.conn()?;
        Ok(db::list_records(&conn)?)
    }

    fn update_sync_state(&self, id: &Uuid, update: &SyncUpdate) -> Result<(), StoreError> {
        let conn = self.conn()?;
        db::update_sync_state(&conn, id, update, &now_utc()).map_err(|e| not_found_as(id, e))
    }

    fn sync_candidates(&self, now: &DateTime<Utc>) -> Result<Vec<SyncCandidate>, StoreError> {
        let conn = self.conn()?;
        Ok(db::list_sync_candidates(&conn, now)?)
    }

    fn claim_for_sync(&self, id: &Uuid) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        Ok(db::claim_for_sync(&conn, id)?)
    }

    fn reset_interrupted(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        Ok(db::reset_interrupted_syncs(&conn)?)
    }

    fn requeue_failed(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        Ok(db::requeue_failed_records(&conn)?)
    }

    fn stats(&self, now: &DateTime<Utc>) -> Result<ScreeningStats, StoreError> {
        let conn = self.conn()?;
        Ok(db::screening_stats(&conn, now)?)
    }
}

impl SettingsStore for SqliteStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        Ok(db::get_setting_raw(&conn, key)?)
    }

    fn set_raw(&self, key: &str, json: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        Ok(db::set_setting_raw(&conn, key, json)?)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        Ok(db::delete_setting(&conn, key)?)
    }
}
