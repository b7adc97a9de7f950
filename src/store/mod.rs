//! Record Store: durable local storage for submitted screenings.
//!
//! The store owns every `ScreeningRecord` from submission onwards. After
//! `append` the only permitted mutation is the sync lifecycle
//! (`update_sync_status` / `update_sync_state`). Settings live in the same
//! database under stable string keys.

mod sqlite_store;

pub use sqlite_store::SqliteStore;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{ScreeningRecord, ScreeningStats, SyncCandidate, SyncStatus, SyncUpdate};

/// Stable keys for persisted scalar settings.
pub mod keys {
    pub const CONNECTIVITY: &str = "chw_connectivity";
    pub const LANGUAGE: &str = "chw_language";
    pub const USER: &str = "chw_user";
    pub const LAST_SYNC: &str = "chw_last_sync";
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Screening record not found: {0}")]
    NotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Durable record storage shared by the workflow engine (append) and the
/// sync reconciler (status updates).
pub trait RecordStore: Send + Sync {
    /// Persist a new record. Once this returns `Ok` the record survives restart.
    fn append(&self, record: &ScreeningRecord) -> Result<(), StoreError>;

    fn get(&self, id: &Uuid) -> Result<ScreeningRecord, StoreError>;

    /// Every record, in insertion order.
    fn list_all(&self) -> Result<Vec<ScreeningRecord>, StoreError>;

    /// Write the full sync-mutable slice of a record.
    fn update_sync_state(&self, id: &Uuid, update: &SyncUpdate) -> Result<(), StoreError>;

    fn update_sync_status(
        &self,
        id: &Uuid,
        status: SyncStatus,
        attempts: u32,
    ) -> Result<(), StoreError> {
        self.update_sync_state(id, &SyncUpdate::new(status, attempts))
    }

    /// Records due for submission at `now`, in insertion order. Only ids and
    /// attempt counts; the full record is read after a successful claim.
    fn sync_candidates(&self, now: &DateTime<Utc>) -> Result<Vec<SyncCandidate>, StoreError>;

    /// Atomically move a record from `pending` or `failed` to `syncing`.
    fn claim_for_sync(&self, id: &Uuid) -> Result<bool, StoreError>;

    /// Revert records left in `syncing` by a previous process.
    fn reset_interrupted(&self) -> Result<usize, StoreError>;

    fn requeue_failed(&self) -> Result<usize, StoreError>;

    fn stats(&self, now: &DateTime<Utc>) -> Result<ScreeningStats, StoreError>;
}

/// Scalar key-value settings, JSON-encoded.
pub trait SettingsStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_raw(&self, key: &str, json: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Typed helpers over any `SettingsStore`.
pub fn get_setting<T: DeserializeOwned>(
    store: &dyn SettingsStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get_raw(key)? {
        Some(json) => Ok(Some(
            serde_json::from_str(&json).map_err(DatabaseError::from)?,
        )),
        None => Ok(None),
    }
}

pub fn set_setting<T: Serialize>(
    store: &dyn SettingsStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(value).map_err(DatabaseError::from)?;
    store.set_raw(key, &json)
}
