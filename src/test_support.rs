//! Shared fixtures and test doubles for unit tests.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::*;
use crate::screening::{Classifier, ClassifierError};
use crate::store::{RecordStore, SqliteStore, StoreError};
use crate::sync::{SyncEndpoint, SyncError};

// ── Images ──────────────────────────────────────────────────

pub fn solid_image(width: u32, height: u32, value: u8) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([value])))
}

pub fn checkerboard_image(width: u32, height: u32, cell: u32) -> DynamicImage {
    let img = GrayImage::from_fn(width, height, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            Luma([30])
        } else {
            Luma([220])
        }
    });
    DynamicImage::ImageLuma8(img)
}

pub fn encode(image: &DynamicImage, format: ImageOutputFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

pub fn checkerboard_png(width: u32, height: u32, cell: u32) -> Vec<u8> {
    encode(&checkerboard_image(width, height, cell), ImageOutputFormat::Png)
}

pub fn solid_png(width: u32, height: u32, value: u8) -> Vec<u8> {
    encode(&solid_image(width, height, value), ImageOutputFormat::Png)
}

// ── Records ─────────────────────────────────────────────────

fn attachment(eye: Eye, data: &[u8]) -> Attachment {
    Attachment {
        eye,
        mime_type: "image/png".into(),
        width: 300,
        height: 300,
        content_hash: format!("hash-{eye}-{}", data.len()),
        perceptual_hash: None,
        data: data.to_vec(),
    }
}

pub fn sample_record(name: &str) -> ScreeningRecord {
    ScreeningRecord {
        id: Uuid::new_v4(),
        patient: Patient {
            name: name.into(),
            age: 34,
            gender: "F".into(),
            phone: None,
        },
        notes: None,
        attachments: EyeAttachments {
            right_eye: attachment(Eye::Right, b"right-eye-bytes"),
            left_eye: attachment(Eye::Left, b"left-eye-bytes!"),
        },
        result: None,
        recorded_by: None,
        created_at: now_utc(),
        sync_status: SyncStatus::Pending,
        sync_attempts: 0,
        next_attempt_at: None,
        synced_at: None,
    }
}

/// In-memory store with `n` freshly appended pending records.
pub fn store_with_records(names: &[&str]) -> (Arc<SqliteStore>, Vec<ScreeningRecord>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let records: Vec<_> = names.iter().map(|n| sample_record(n)).collect();
    for record in &records {
        store.append(record).unwrap();
    }
    (store, records)
}

// ── Classifiers ─────────────────────────────────────────────

/// Returns the same outcome on every call.
pub struct StaticClassifier {
    outcome: Result<AnalysisResult, ClassifierError>,
    calls: AtomicUsize,
}

impl StaticClassifier {
    pub fn ok(label: &str, confidence: f32) -> Self {
        Self {
            outcome: Ok(AnalysisResult {
                label: label.into(),
                confidence,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            outcome: Err(ClassifierError::Connection("connection refused".into())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for StaticClassifier {
    fn classify(
        &self,
        _right_eye: Attachment,
        _left_eye: Attachment,
    ) -> BoxFuture<'_, Result<AnalysisResult, ClassifierError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcome.clone();
        Box::pin(async move { outcome })
    }
}

/// Never answers.
pub struct HangingClassifier;

impl Classifier for HangingClassifier {
    fn classify(
        &self,
        _right_eye: Attachment,
        _left_eye: Attachment,
    ) -> BoxFuture<'_, Result<AnalysisResult, ClassifierError>> {
        Box::pin(futures_util::future::pending())
    }
}

/// Answers once the gate is notified.
pub struct GatedClassifier {
    gate: Arc<Notify>,
}

impl GatedClassifier {
    pub fn new(gate: Arc<Notify>) -> Self {
        Self { gate }
    }
}

impl Classifier for GatedClassifier {
    fn classify(
        &self,
        _right_eye: Attachment,
        _left_eye: Attachment,
    ) -> BoxFuture<'_, Result<AnalysisResult, ClassifierError>> {
        Box::pin(async move {
            self.gate.notified().await;
            Ok(AnalysisResult {
                label: "Normal".into(),
                confidence: 92.0,
            })
        })
    }
}

// ── Stores ──────────────────────────────────────────────────

/// Real SQLite store that fails a configurable number of writes.
pub struct FlakyStore {
    inner: SqliteStore,
    fail_appends: AtomicUsize,
    fail_updates: AtomicUsize,
    fail_gets: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_appends: AtomicUsize::new(0),
            fail_updates: AtomicUsize::new(0),
            fail_gets: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_appends(&self, n: usize) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_updates(&self, n: usize) {
        self.fail_updates.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_gets(&self, n: usize) {
        self.fail_gets.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> Result<(), StoreError> {
        let failed = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StoreError::Storage(DatabaseError::ConstraintViolation(
                "disk I/O error (injected)".into(),
            )))
        } else {
            Ok(())
        }
    }
}

impl RecordStore for FlakyStore {
    fn append(&self, record: &ScreeningRecord) -> Result<(), StoreError> {
        Self::take_failure(&self.fail_appends)?;
        self.inner.append(record)
    }

    fn get(&self, id: &Uuid) -> Result<ScreeningRecord, StoreError> {
        Self::take_failure(&self.fail_gets)?;
        self.inner.get(id)
    }

    fn list_all(&self) -> Result<Vec<ScreeningRecord>, StoreError> {
        self.inner.list_all()
    }

    fn update_sync_state(&self, id: &Uuid, update: &SyncUpdate) -> Result<(), StoreError> {
        Self::take_failure(&self.fail_updates)?;
        self.inner.update_sync_state(id, update)
    }

    fn sync_candidates(&self, now: &DateTime<Utc>) -> Result<Vec<SyncCandidate>, StoreError> {
        self.inner.sync_candidates(now)
    }

    fn claim_for_sync(&self, id: &Uuid) -> Result<bool, StoreError> {
        self.inner.claim_for_sync(id)
    }

    fn reset_interrupted(&self) -> Result<usize, StoreError> {
        self.inner.reset_interrupted()
    }

    fn requeue_failed(&self) -> Result<usize, StoreError> {
        self.inner.requeue_failed()
    }

    fn stats(&self, now: &DateTime<Utc>) -> Result<ScreeningStats, StoreError> {
        self.inner.stats(now)
    }
}

// ── Sync endpoints ──────────────────────────────────────────

/// Records every submission and replays scripted outcomes in order.
/// Once the script runs out every submission succeeds.
#[derive(Default)]
pub struct ScriptedEndpoint {
    script: Mutex<VecDeque<Result<(), SyncError>>>,
    calls: Mutex<Vec<Uuid>>,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(outcomes: Vec<Result<(), SyncError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    /// Each submission sleeps for `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Each submission waits for the gate before answering.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<Uuid> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl SyncEndpoint for ScriptedEndpoint {
    fn submit_record<'a>(
        &'a self,
        record: &'a ScreeningRecord,
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(record.id);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        })
    }
}
