use serde::Serialize;
use uuid::Uuid;

use super::error::{PatientField, ValidationError};
use super::quality::QualityReport;
use crate::models::{AnalysisResult, Attachment, Eye, Patient};

/// Wizard steps. `Submitted` is terminal and immediately re-arms to `Intake`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Intake = 1,
    Capture = 2,
    Review = 3,
    Submitted = 4,
}

impl Step {
    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn from_number(n: u8) -> Option<Step> {
        match n {
            1 => Some(Self::Intake),
            2 => Some(Self::Capture),
            3 => Some(Self::Review),
            4 => Some(Self::Submitted),
            _ => None,
        }
    }

    fn next(&self) -> Option<Step> {
        Step::from_number(self.number() + 1)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Intake => write!(f, "intake"),
            Self::Capture => write!(f, "capture"),
            Self::Review => write!(f, "review"),
            Self::Submitted => write!(f, "submitted"),
        }
    }
}

/// Intake form as typed so far. Blank strings count as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatientDraft {
    pub name: String,
    pub age: Option<u32>,
    pub gender: String,
    pub phone: String,
}

impl PatientDraft {
    pub fn missing_fields(&self) -> Vec<PatientField> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push(PatientField::Name);
        }
        if self.age.is_none() {
            missing.push(PatientField::Age);
        }
        if self.gender.trim().is_empty() {
            missing.push(PatientField::Gender);
        }
        missing
    }

    /// `None` while any required field is missing.
    pub fn to_patient(&self) -> Option<Patient> {
        if !self.missing_fields().is_empty() {
            return None;
        }
        let phone = self.phone.trim();
        Some(Patient {
            name: self.name.trim().to_string(),
            age: self.age?,
            gender: self.gender.trim().to_string(),
            phone: (!phone.is_empty()).then(|| phone.to_string()),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftAttachments {
    pub right_eye: Option<Attachment>,
    pub left_eye: Option<Attachment>,
}

impl DraftAttachments {
    pub fn get(&self, eye: Eye) -> Option<&Attachment> {
        match eye {
            Eye::Right => self.right_eye.as_ref(),
            Eye::Left => self.left_eye.as_ref(),
        }
    }

    pub(crate) fn set(&mut self, attachment: Attachment) {
        match attachment.eye {
            Eye::Right => self.right_eye = Some(attachment),
            Eye::Left => self.left_eye = Some(attachment),
        }
    }

    pub fn missing(&self) -> Vec<Eye> {
        Eye::BOTH
            .into_iter()
            .filter(|eye| self.get(*eye).is_none())
            .collect()
    }

    /// Content hashes of both photos, once both are present.
    pub(crate) fn digests(&self) -> Option<(String, String)> {
        match (&self.right_eye, &self.left_eye) {
            (Some(r), Some(l)) => Some((r.content_hash.clone(), l.content_hash.clone())),
            _ => None,
        }
    }
}

/// The single in-progress screening owned by the workflow engine.
/// Never persisted; dropped on submit or reset.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftSession {
    pub id: Uuid,
    pub step: Step,
    pub patient: PatientDraft,
    pub notes: String,
    pub attachments: DraftAttachments,
    /// Gate failures from the most recent `advance`, cleared on success.
    pub errors: Vec<ValidationError>,
}

impl DraftSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            step: Step::Intake,
            patient: PatientDraft::default(),
            notes: String::new(),
            attachments: DraftAttachments::default(),
            errors: Vec::new(),
        }
    }

    /// Gate that must pass to leave `step` forwards.
    pub fn gate(&self, step: Step) -> Result<(), ValidationError> {
        match step {
            Step::Intake => {
                let missing = self.patient.missing_fields();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(ValidationError::MissingFields(missing))
                }
            }
            Step::Capture => {
                let missing = self.attachments.missing();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(ValidationError::MissingAttachments(missing))
                }
            }
            Step::Review | Step::Submitted => Ok(()),
        }
    }

    /// Every gate between the current step and `target`.
    pub fn gates_until(&self, target: Step) -> Result<(), ValidationError> {
        let mut step = self.step;
        while step < target {
            self.gate(step)?;
            match step.next() {
                Some(next) => step = next,
                None => break,
            }
        }
        Ok(())
    }
}

impl Default for DraftSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress of the classifier call for the current draft.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisStatus {
    NotStarted,
    Running,
    Completed(AnalysisResult),
    /// Timed out or errored. The record is submitted without a result.
    Unavailable(String),
}

/// Notifications from background work, delivered after the triggering call returned.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    QualityChecked {
        draft_id: Uuid,
        eye: Eye,
        report: QualityReport,
    },
    AnalysisCompleted {
        draft_id: Uuid,
        result: AnalysisResult,
    },
    AnalysisUnavailable {
        draft_id: Uuid,
        reason: String,
    },
    Submitted {
        record_id: Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_patient() -> PatientDraft {
        PatientDraft {
            name: "Aisha".into(),
            age: Some(34),
            gender: "F".into(),
            phone: String::new(),
        }
    }

    #[test]
    fn step_numbers_round_trip() {
        for step in [Step::Intake, Step::Capture, Step::Review, Step::Submitted] {
            assert_eq!(Step::from_number(step.number()), Some(step));
        }
        assert_eq!(Step::from_number(0), None);
        assert_eq!(Step::from_number(5), None);
    }

    #[test]
    fn whitespace_counts_as_missing() {
        let patient = PatientDraft {
            name: "   ".into(),
            age: None,
            gender: "\t".into(),
            phone: String::new(),
        };
        assert_eq!(
            patient.missing_fields(),
            vec![PatientField::Name, PatientField::Age, PatientField::Gender]
        );
        assert!(patient.to_patient().is_none());
    }

    #[test]
    fn to_patient_trims_and_drops_blank_phone() {
        let mut draft = filled_patient();
        draft.name = "  Aisha Bello ".into();
        let patient = draft.to_patient().unwrap();
        assert_eq!(patient.name, "Aisha Bello");
        assert_eq!(patient.phone, None);

        draft.phone = " 0803 ".into();
        assert_eq!(draft.to_patient().unwrap().phone.as_deref(), Some("0803"));
    }

    #[test]
    fn gates_until_review_checks_both_gates_from_intake() {
        let mut draft = DraftSession::new();
        assert!(matches!(
            draft.gates_until(Step::Review),
            Err(ValidationError::MissingFields(_))
        ));

        draft.patient = filled_patient();
        assert_eq!(
            draft.gates_until(Step::Review),
            Err(ValidationError::MissingAttachments(vec![Eye::Right, Eye::Left]))
        );
        assert_eq!(draft.gates_until(Step::Capture), Ok(()));
    }

    #[test]
    fn backward_targets_have_no_gates() {
        let mut draft = DraftSession::new();
        draft.step = Step::Review;
        assert_eq!(draft.gates_until(Step::Intake), Ok(()));
    }
}
