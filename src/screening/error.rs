//! Workflow error taxonomy.
//!
//! `WorkflowError` is returned synchronously for anything that blocks the
//! user (validation, bad photo, storage failure on submit). Classifier
//! failures never surface here: they only leave the analysis result absent.

use serde::Serialize;
use thiserror::Error;

use super::types::Step;
use crate::models::Eye;
use crate::store::StoreError;

/// Required intake fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientField {
    Name,
    Age,
    Gender,
}

impl std::fmt::Display for PatientField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name => write!(f, "name"),
            Self::Age => write!(f, "age"),
            Self::Gender => write!(f, "gender"),
        }
    }
}

/// User-fixable gate failure. The step does not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "missing", rename_all = "snake_case")]
pub enum ValidationError {
    MissingFields(Vec<PatientField>),
    MissingAttachments(Vec<Eye>),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingFields(fields) => {
                let names: Vec<String> = fields.iter().map(|x| x.to_string()).collect();
                write!(f, "missing required fields: {}", names.join(", "))
            }
            Self::MissingAttachments(eyes) => {
                let names: Vec<&str> = eyes.iter().map(|e| e.as_str()).collect();
                write!(f, "missing eye photos: {}", names.join(", "))
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Cannot submit from step {0}; the review step must be reached first")]
    NotAtReview(Step),

    #[error("{what} can only be edited on step {allowed}, current step is {current}")]
    StepLocked {
        what: &'static str,
        allowed: Step,
        current: Step,
    },

    #[error("Cannot advance to {0}")]
    InvalidTarget(Step),

    /// A gate that earlier steps guarantee was found open at submit time.
    #[error("Workflow invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Could not save screening: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("Classifier timed out after {0}s")]
    Timeout(u64),

    #[error("Classifier unreachable: {0}")]
    Connection(String),

    #[error("Classifier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_name_missing_items() {
        let err = ValidationError::MissingFields(vec![PatientField::Age, PatientField::Gender]);
        assert_eq!(err.to_string(), "missing required fields: age, gender");

        let err = ValidationError::MissingAttachments(vec![Eye::Left]);
        assert_eq!(err.to_string(), "missing eye photos: left");
    }

    #[test]
    fn validation_serializes_for_inline_display() {
        let err = ValidationError::MissingAttachments(vec![Eye::Right, Eye::Left]);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "missing_attachments");
        assert_eq!(json["missing"][0], "right");
    }
}
