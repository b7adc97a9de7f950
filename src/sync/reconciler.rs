//! Sync Reconciler: moves records from local-only to remote-acknowledged.
//!
//! One pass selects every record whose backoff window has elapsed, claims
//! each one (`→ syncing`), loads it, submits it, then writes the outcome:
//! - success: `synced`
//! - transport or server failure: back to `pending`, attempts + 1, backoff window
//! - rejection by the server: `failed`, attempts + 1, backoff window
//!
//! Remote failures are never terminal. A `failed` record is retried on the
//! same capped backoff as a `pending` one; `requeue_failed` makes it
//! eligible immediately. The backoff window starts when the outcome is
//! known, not when the pass started.
//!
//! Submissions for different records run concurrently up to the configured
//! limit. A record id is never submitted twice at once: the store claim is
//! atomic and the reconciler also tracks ids it has in flight.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use super::error::SyncError;
use super::traits::SyncEndpoint;
use crate::config::SyncConfig;
use crate::models::{now_utc, SyncCandidate, SyncStatus, SyncUpdate};
use crate::store::{keys, set_setting, RecordStore, SettingsStore};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Records submitted to the endpoint this pass.
    pub attempted: usize,
    pub synced: usize,
    /// Failed with a retryable error; back to `pending` with backoff.
    pub retrying: usize,
    /// Rejected by the server; now `failed` with backoff.
    pub rejected: usize,
    /// Claimed elsewhere between selection and claim.
    pub skipped: usize,
    /// Outcomes that could not be written; retried on the next pass.
    pub storage_errors: usize,
    /// Outcomes from earlier passes written this pass.
    pub recovered: usize,
}

enum Outcome {
    Synced,
    Retrying,
    Rejected,
    Skipped,
    StorageError,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a record id in the in-flight set until dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<Uuid>>, id: Uuid) -> Option<Self> {
        lock(set).insert(id).then(|| Self { set, id })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.id);
    }
}

pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    endpoint: Arc<dyn SyncEndpoint>,
    settings: Option<Arc<dyn SettingsStore>>,
    config: SyncConfig,
    backoff: BackoffPolicy,
    in_flight: Mutex<HashSet<Uuid>>,
    /// Outcomes whose status write failed, keyed by record id.
    unsaved: Mutex<HashMap<Uuid, SyncUpdate>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        endpoint: Arc<dyn SyncEndpoint>,
        config: SyncConfig,
    ) -> Self {
        let config = config.sanitized();
        Self {
            store,
            endpoint,
            settings: None,
            backoff: BackoffPolicy::from_config(&config),
            config,
            in_flight: Mutex::new(HashSet::new()),
            unsaved: Mutex::new(HashMap::new()),
        }
    }

    /// Record the time of each pass that synced something under `chw_last_sync`.
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Submissions currently awaiting the endpoint.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Return records left in `syncing` by a previous process to `pending`.
    /// Call once at start-up, before the first pass.
    pub fn recover_interrupted(&self) -> Result<usize, SyncError> {
        let count = self.store.reset_interrupted()?;
        if count > 0 {
            tracing::info!(count, "Recovered records interrupted mid-sync");
        }
        Ok(count)
    }

    /// Make rejected records eligible now, skipping their backoff window.
    pub fn requeue_failed(&self) -> Result<usize, SyncError> {
        let count = self.store.requeue_failed()?;
        if count > 0 {
            tracing::info!(count, "Requeued failed records");
        }
        Ok(count)
    }

    pub async fn run_pass(&self) -> Result<PassReport, SyncError> {
        self.run_pass_at(now_utc()).await
    }

    /// One pass with an explicit clock. `now` selects eligible records; the
    /// next attempt of a failed submission is scheduled from `now` plus the
    /// time elapsed in this pass when its outcome arrives.
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<PassReport, SyncError> {
        let started = Instant::now();
        let mut report = PassReport {
            recovered: self.flush_unsaved(),
            ..PassReport::default()
        };

        let candidates = self.store.sync_candidates(&now)?;
        if candidates.is_empty() {
            tracing::debug!("No records eligible for sync");
            return Ok(report);
        }

        tracing::debug!(count = candidates.len(), "Sync pass starting");

        let outcomes: Vec<Outcome> = stream::iter(candidates)
            .map(|candidate| self.sync_one(candidate, now, started))
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Synced => report.synced += 1,
                Outcome::Retrying => report.retrying += 1,
                Outcome::Rejected => report.rejected += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::StorageError => report.storage_errors += 1,
            }
        }
        report.attempted = report.synced + report.retrying + report.rejected;

        if report.synced > 0 {
            self.record_last_sync();
        }

        tracing::info!(
            attempted = report.attempted,
            synced = report.synced,
            retrying = report.retrying,
            rejected = report.rejected,
            storage_errors = report.storage_errors,
            "Sync pass complete"
        );
        Ok(report)
    }

    async fn sync_one(
        &self,
        candidate: SyncCandidate,
        now: DateTime<Utc>,
        started: Instant,
    ) -> Outcome {
        let id = candidate.id;
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, id) else {
            tracing::debug!(record_id = %id, "Already in flight, skipping");
            return Outcome::Skipped;
        };

        match self.store.claim_for_sync(&id) {
            Ok(true) => {}
            Ok(false) => return Outcome::Skipped,
            Err(e) => {
                tracing::warn!(record_id = %id, error = %e, "Failed to claim record for sync");
                return Outcome::StorageError;
            }
        }

        let record = match self.store.get(&id) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(record_id = %id, error = %e, "Failed to load claimed record");
                let release = SyncUpdate::new(candidate.sync_status, candidate.sync_attempts);
                self.save_outcome(&id, release);
                return Outcome::StorageError;
            }
        };

        let timeout = self.config.submit_timeout;
        let result = match tokio::time::timeout(timeout, self.endpoint.submit_record(&record)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(timeout.as_secs())),
        };

        let (update, outcome) = match result {
            Ok(()) => {
                tracing::info!(record_id = %id, "Record synced");
                (
                    SyncUpdate::new(SyncStatus::Synced, record.sync_attempts),
                    Outcome::Synced,
                )
            }
            Err(e) => {
                let attempts = record.sync_attempts.saturating_add(1);
                let finished = now
                    + chrono::Duration::from_std(started.elapsed())
                        .unwrap_or_else(|_| chrono::Duration::zero());
                let next_attempt_at = self.backoff.next_attempt_at(attempts, finished);
                let retry_in_secs = self.backoff.delay(attempts).as_secs();

                let (status, outcome) = if e.is_retryable() {
                    tracing::warn!(
                        record_id = %id,
                        attempts,
                        retry_in_secs,
                        error = %e,
                        "Sync attempt failed"
                    );
                    (SyncStatus::Pending, Outcome::Retrying)
                } else {
                    tracing::error!(
                        record_id = %id,
                        attempts,
                        retry_in_secs,
                        error = %e,
                        "Record rejected by sync server"
                    );
                    (SyncStatus::Failed, Outcome::Rejected)
                };

                (
                    SyncUpdate {
                        status,
                        attempts,
                        next_attempt_at,
                    },
                    outcome,
                )
            }
        };

        if self.save_outcome(&id, update) {
            outcome
        } else {
            Outcome::StorageError
        }
    }

    /// Write a sync outcome, keeping it for the next pass if the write fails.
    fn save_outcome(&self, id: &Uuid, update: SyncUpdate) -> bool {
        match self.store.update_sync_state(id, &update) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    record_id = %id,
                    error = %e,
                    "Failed to save sync outcome; will retry next pass"
                );
                lock(&self.unsaved).insert(*id, update);
                false
            }
        }
    }

    /// Write outcomes that failed to save on an earlier pass.
    fn flush_unsaved(&self) -> usize {
        let unsaved: Vec<(Uuid, SyncUpdate)> = lock(&self.unsaved).drain().collect();
        let mut written = 0;
        for (id, update) in unsaved {
            match self.store.update_sync_state(&id, &update) {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(record_id = %id, error = %e, "Sync outcome still unsaved");
                    lock(&self.unsaved).insert(id, update);
                }
            }
        }
        written
    }

    fn record_last_sync(&self) {
        if let Some(settings) = &self.settings {
            if let Err(e) = set_setting(settings.as_ref(), keys::LAST_SYNC, &now_utc()) {
                tracing::warn!(error = %e, "Failed to save last sync time");
            }
        }
    }
}
