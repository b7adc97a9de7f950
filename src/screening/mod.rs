//! Screening workflow
//!
//! Guides one screening at a time through a four-step wizard and turns it
//! into an immutable `ScreeningRecord`:
//! ```text
//! Intake → Capture → Review → Submitted (re-arms to Intake)
//! ```
//!
//! ## Modules
//! - types: steps, draft session, analysis status, events
//! - attachment: photo decoding, orientation, digests
//! - quality: advisory photo checks
//! - classifier: HTTP adapter for the remote analysis service
//! - workflow: the engine that owns the draft and enforces step gates

pub mod error;
pub mod types;
pub mod traits;
pub mod attachment;
pub mod quality;
pub mod classifier;
pub mod workflow;

pub use error::{ClassifierError, PatientField, ValidationError, WorkflowError};
pub use types::*;
pub use traits::*;
pub use attachment::{decode_photo, DecodedPhoto};
pub use quality::{BasicQualityChecker, QualityIssue, QualityReport};
pub use classifier::HttpClassifier;
pub use workflow::WorkflowEngine;
