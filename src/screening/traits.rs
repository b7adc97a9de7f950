//! Seams to the capabilities the workflow depends on but does not own.
//!
//! - Classifier: remote image analysis, slow and fallible
//! - QualityChecker: advisory photo checks, CPU-bound

use futures_util::future::BoxFuture;
use image::DynamicImage;

use super::error::ClassifierError;
use super::quality::QualityReport;
use crate::models::{AnalysisResult, Attachment};

/// Opaque analysis service: both eye photos in, a label and confidence out.
///
/// Callers bound every call with a timeout; implementations need not.
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        right_eye: Attachment,
        left_eye: Attachment,
    ) -> BoxFuture<'_, Result<AnalysisResult, ClassifierError>>;
}

/// Advisory image checks run after a photo is captured.
pub trait QualityChecker: Send + Sync {
    /// `other_eye_hash` is the perceptual hash of the opposite eye's photo, if captured.
    fn check(
        &self,
        image: &DynamicImage,
        own_hash: Option<&str>,
        other_eye_hash: Option<&str>,
    ) -> QualityReport;
}
