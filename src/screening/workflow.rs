//! Workflow Engine: the guarded intake → capture → review → submit wizard.
//!
//! The engine exclusively owns one `DraftSession`. Forward moves pass
//! through step gates; backward moves are always allowed. Entering Review
//! starts the classifier in the background, and photo quality checks run
//! the same way. Both report through the `WorkflowEvent` channel, keyed by
//! draft id, and results for a draft that has since been reset are
//! dropped. `submit` is the only path that writes to the record store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::DynamicImage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::attachment::decode_photo;
use super::classifier::validate_result;
use super::error::{ClassifierError, WorkflowError};
use super::quality::BasicQualityChecker;
use super::traits::{Classifier, QualityChecker};
use super::types::*;
use crate::config::WorkflowConfig;
use crate::models::{now_utc, AnalysisResult, Eye, EyeAttachments, ScreeningRecord, SyncStatus};
use crate::store::RecordStore;

/// Shared between the engine and its classifier task. The task only writes
/// when `draft_id` and `inputs` still match what it was started with.
struct AnalysisSlot {
    draft_id: Uuid,
    /// Content hashes (right, left) the current status refers to.
    inputs: Option<(String, String)>,
    status: AnalysisStatus,
}

impl AnalysisSlot {
    fn new(draft_id: Uuid) -> Self {
        Self {
            draft_id,
            inputs: None,
            status: AnalysisStatus::NotStarted,
        }
    }
}

fn lock_slot(slot: &Mutex<AnalysisSlot>) -> MutexGuard<'_, AnalysisSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct WorkflowEngine {
    store: Arc<dyn RecordStore>,
    classifier: Arc<dyn Classifier>,
    quality: Arc<dyn QualityChecker>,
    config: WorkflowConfig,
    screener: Option<String>,
    draft: DraftSession,
    analysis: Arc<Mutex<AnalysisSlot>>,
    analysis_task: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<WorkflowEvent>,
}

impl WorkflowEngine {
    /// Create an engine at `Intake` with an empty draft. Background
    /// notifications arrive on the returned receiver.
    pub fn new(
        store: Arc<dyn RecordStore>,
        classifier: Arc<dyn Classifier>,
        config: WorkflowConfig,
    ) -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let draft = DraftSession::new();
        let engine = Self {
            store,
            classifier,
            quality: Arc::new(BasicQualityChecker),
            config,
            screener: None,
            analysis: Arc::new(Mutex::new(AnalysisSlot::new(draft.id))),
            draft,
            analysis_task: None,
            events,
        };
        (engine, rx)
    }

    pub fn with_quality_checker(mut self, quality: Arc<dyn QualityChecker>) -> Self {
        self.quality = quality;
        self
    }

    /// Identity stamped on submitted records as `recorded_by`.
    pub fn set_screener(&mut self, screener: Option<String>) {
        self.screener = screener;
    }

    pub fn draft(&self) -> &DraftSession {
        &self.draft
    }

    pub fn step(&self) -> Step {
        self.draft.step
    }

    pub fn analysis_status(&self) -> AnalysisStatus {
        lock_slot(&self.analysis).status.clone()
    }

    // ── Draft editing ───────────────────────────────────────

    /// Edit intake fields. Only allowed on the intake step; go back first.
    pub fn edit_patient<F>(&mut self, edit: F) -> Result<(), WorkflowError>
    where
        F: FnOnce(&mut PatientDraft),
    {
        if self.draft.step != Step::Intake {
            return Err(WorkflowError::StepLocked {
                what: "Patient details",
                allowed: Step::Intake,
                current: self.draft.step,
            });
        }
        edit(&mut self.draft.patient);
        Ok(())
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.draft.notes = notes.into();
    }

    /// Decode a photo and store it for `eye`, replacing any earlier capture.
    ///
    /// The quality report follows later as `WorkflowEvent::QualityChecked`.
    pub fn capture(&mut self, eye: Eye, raw: Vec<u8>) -> Result<(), WorkflowError> {
        let photo = decode_photo(eye, raw, &self.config).map_err(|e| {
            tracing::info!(eye = %eye, error = %e, "Photo rejected");
            e
        })?;

        let own_hash = photo.attachment.perceptual_hash.clone();
        let other_hash = self
            .draft
            .attachments
            .get(eye.other())
            .and_then(|a| a.perceptual_hash.clone());

        tracing::debug!(
            eye = %eye,
            width = photo.attachment.width,
            height = photo.attachment.height,
            bytes = photo.attachment.data.len(),
            "Photo captured"
        );
        self.draft.attachments.set(photo.attachment);

        self.spawn_quality_check(eye, photo.image, own_hash, other_hash);

        // A retake changes the classifier inputs.
        if self.draft.step == Step::Review {
            self.start_analysis();
        }
        Ok(())
    }

    // ── Transitions ─────────────────────────────────────────

    /// Move to `target`, applying every forward gate on the way.
    /// On failure the step is unchanged and the error is kept on the draft.
    pub fn advance(&mut self, target: Step) -> Result<Step, WorkflowError> {
        if target == Step::Submitted {
            return Err(WorkflowError::InvalidTarget(target));
        }

        let current = self.draft.step;
        if let Err(e) = self.draft.gates_until(target) {
            tracing::debug!(from = %current, to = %target, error = %e, "Step gate failed");
            self.draft.errors = vec![e.clone()];
            return Err(e.into());
        }

        self.draft.errors.clear();
        self.draft.step = target;

        if target == Step::Review && current != Step::Review {
            self.start_analysis();
        }
        Ok(target)
    }

    /// Discard the draft and return to an empty intake step.
    /// Any classifier call in flight is cancelled and its result dropped.
    pub fn reset(&mut self) {
        self.abort_analysis_task();
        self.draft = DraftSession::new();
        *lock_slot(&self.analysis) = AnalysisSlot::new(self.draft.id);
        tracing::debug!(draft_id = %self.draft.id, "Workflow reset to intake");
    }

    /// Turn the draft into an immutable record and append it to the store.
    ///
    /// On a storage failure the draft stays at review so the caller can retry.
    pub fn submit(&mut self) -> Result<ScreeningRecord, WorkflowError> {
        if self.draft.step != Step::Review {
            return Err(WorkflowError::NotAtReview(self.draft.step));
        }

        let patient = self.draft.patient.to_patient().ok_or_else(|| {
            invariant(format!(
                "patient fields missing at submit: {:?}",
                self.draft.patient.missing_fields()
            ))
        })?;

        let attachments = match (&self.draft.attachments.right_eye, &self.draft.attachments.left_eye) {
            (Some(right), Some(left)) => EyeAttachments {
                right_eye: right.clone(),
                left_eye: left.clone(),
            },
            _ => {
                return Err(invariant(format!(
                    "eye photos missing at submit: {:?}",
                    self.draft.attachments.missing()
                )))
            }
        };

        let notes = self.draft.notes.trim();
        let record = ScreeningRecord {
            id: Uuid::new_v4(),
            patient,
            notes: (!notes.is_empty()).then(|| notes.to_string()),
            attachments,
            result: self.current_result(),
            recorded_by: self.screener.clone(),
            created_at: now_utc(),
            sync_status: SyncStatus::Pending,
            sync_attempts: 0,
            next_attempt_at: None,
            synced_at: None,
        };

        if let Err(e) = self.store.append(&record) {
            tracing::error!(error = %e, "Failed to save screening record");
            return Err(e.into());
        }

        tracing::info!(
            record_id = %record.id,
            has_result = record.result.is_some(),
            "Screening submitted"
        );

        self.draft.step = Step::Submitted;
        let _ = self.events.send(WorkflowEvent::Submitted {
            record_id: record.id,
        });
        self.reset();

        Ok(record)
    }

    /// Wait for the classifier call of the current draft, if one is running.
    /// Bounded by the classifier timeout.
    pub async fn wait_for_analysis(&mut self) -> AnalysisStatus {
        if let Some(task) = self.analysis_task.take() {
            let _ = task.await;
        }
        self.analysis_status()
    }

    // ── Background work ─────────────────────────────────────

    /// The classifier result, only if it belongs to the current photos.
    fn current_result(&self) -> Option<AnalysisResult> {
        let slot = lock_slot(&self.analysis);
        match (&slot.status, &slot.inputs) {
            (AnalysisStatus::Completed(result), Some(inputs))
                if self.draft.attachments.digests().as_ref() == Some(inputs) =>
            {
                Some(result.clone())
            }
            _ => None,
        }
    }

    fn start_analysis(&mut self) {
        let (Some(right), Some(left)) = (
            self.draft.attachments.right_eye.clone(),
            self.draft.attachments.left_eye.clone(),
        ) else {
            return;
        };
        let inputs = (right.content_hash.clone(), left.content_hash.clone());

        {
            let mut slot = lock_slot(&self.analysis);
            let same_inputs = slot.inputs.as_ref() == Some(&inputs);
            if same_inputs
                && matches!(
                    slot.status,
                    AnalysisStatus::Running | AnalysisStatus::Completed(_)
                )
            {
                return;
            }
            slot.inputs = Some(inputs.clone());
            slot.status = AnalysisStatus::Running;
        }
        self.abort_analysis_task();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; screening continues without analysis");
            lock_slot(&self.analysis).status =
                AnalysisStatus::Unavailable("no async runtime".into());
            return;
        };

        let classifier = self.classifier.clone();
        let slot = self.analysis.clone();
        let events = self.events.clone();
        let timeout = self.config.classifier_timeout;
        let draft_id = self.draft.id;

        tracing::debug!(draft_id = %draft_id, "Starting analysis");
        self.analysis_task = Some(runtime.spawn(async move {
            let outcome = match tokio::time::timeout(timeout, classifier.classify(right, left)).await {
                Ok(Ok(result)) => validate_result(result),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ClassifierError::Timeout(timeout.as_secs())),
            };

            let event = {
                let mut slot = lock_slot(&slot);
                if slot.draft_id != draft_id || slot.inputs.as_ref() != Some(&inputs) {
                    tracing::debug!(draft_id = %draft_id, "Discarding stale analysis result");
                    return;
                }
                match outcome {
                    Ok(result) => {
                        slot.status = AnalysisStatus::Completed(result.clone());
                        WorkflowEvent::AnalysisCompleted { draft_id, result }
                    }
                    Err(e) => {
                        tracing::warn!(
                            draft_id = %draft_id,
                            error = %e,
                            "Analysis unavailable; screening continues without a result"
                        );
                        slot.status = AnalysisStatus::Unavailable(e.to_string());
                        WorkflowEvent::AnalysisUnavailable {
                            draft_id,
                            reason: e.to_string(),
                        }
                    }
                }
            };
            let _ = events.send(event);
        }));
    }

    fn abort_analysis_task(&mut self) {
        if let Some(task) = self.analysis_task.take() {
            task.abort();
        }
    }

    fn spawn_quality_check(
        &self,
        eye: Eye,
        image: DynamicImage,
        own_hash: Option<String>,
        other_hash: Option<String>,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime; skipping quality check");
            return;
        };

        let checker = self.quality.clone();
        let slot = self.analysis.clone();
        let events = self.events.clone();
        let draft_id = self.draft.id;

        runtime.spawn(async move {
            let checked = tokio::task::spawn_blocking(move || {
                checker.check(&image, own_hash.as_deref(), other_hash.as_deref())
            })
            .await;

            let report = match checked {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!(eye = %eye, error = %e, "Quality check did not complete");
                    return;
                }
            };

            if lock_slot(&slot).draft_id != draft_id {
                return;
            }
            if !report.passed() {
                tracing::info!(eye = %eye, issues = ?report.issues, "Photo quality warning");
            }
            let _ = events.send(WorkflowEvent::QualityChecked {
                draft_id,
                eye,
                report,
            });
        });
    }
}

fn invariant(message: String) -> WorkflowError {
    tracing::error!(%message, "Workflow invariant violated");
    WorkflowError::InvariantViolation(message)
}

impl Drop for WorkflowEngine {
    fn drop(&mut self) {
        self.abort_analysis_task();
    }
}
