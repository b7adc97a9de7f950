//! Advisory photo quality checks.
//!
//! Runs after capture on a blocking task. A failing report never blocks the
//! workflow; it is surfaced to the health worker as a prompt to retake.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};
use serde::Serialize;

use super::traits::QualityChecker;

/// Smallest usable side length for an eye photo.
const MIN_DIMENSION: u32 = 224;

/// Longest side after downscaling, before pixel statistics are computed.
const ANALYSIS_MAX_DIM: u32 = 512;

/// Laplacian variance below this = blurry.
const BLUR_THRESHOLD: f32 = 60.0;

/// Perceptual similarity at or above this = same photo submitted for both eyes.
const DUPLICATE_SIMILARITY: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum QualityIssue {
    TooSmall { width: u32, height: u32 },
    Blank,
    Dark,
    Blurry { sharpness: f32 },
    SameAsOtherEye { similarity: f64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub issues: Vec<QualityIssue>,
    /// Laplacian variance of the downscaled grayscale image.
    pub sharpness: f32,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Blank, dark, blur, size and duplicate-eye detection.
pub struct BasicQualityChecker;

impl QualityChecker for BasicQualityChecker {
    fn check(
        &self,
        image: &DynamicImage,
        own_hash: Option<&str>,
        other_eye_hash: Option<&str>,
    ) -> QualityReport {
        let mut report = QualityReport::default();
        let (width, height) = image.dimensions();

        if width < MIN_DIMENSION || height < MIN_DIMENSION {
            report.issues.push(QualityIssue::TooSmall { width, height });
        }
        if width == 0 || height == 0 {
            return report;
        }

        let gray = downscale_gray(image);
        let pixel_count = (gray.width() as usize) * (gray.height() as usize);

        let white = gray.pixels().filter(|p| p.0[0] > 240).count();
        if white as f32 / pixel_count as f32 > 0.95 {
            report.issues.push(QualityIssue::Blank);
        }

        let dark = gray.pixels().filter(|p| p.0[0] < 15).count();
        if dark as f32 / pixel_count as f32 > 0.80 {
            report.issues.push(QualityIssue::Dark);
        }

        report.sharpness = compute_laplacian_variance(&gray);
        if report.sharpness < BLUR_THRESHOLD {
            report.issues.push(QualityIssue::Blurry {
                sharpness: report.sharpness,
            });
        }

        if let (Some(own), Some(other)) = (own_hash, other_eye_hash) {
            if let Some(similarity) = hash_similarity(own, other) {
                if similarity >= DUPLICATE_SIMILARITY {
                    report.issues.push(QualityIssue::SameAsOtherEye { similarity });
                }
            }
        }

        report
    }
}

fn downscale_gray(image: &DynamicImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    let gray = image.to_luma8();
    if longest <= ANALYSIS_MAX_DIM {
        return gray;
    }
    let scale = ANALYSIS_MAX_DIM as f32 / longest as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    image::imageops::resize(&gray, new_w, new_h, FilterType::Triangle)
}

/// Laplacian variance of a grayscale image, a sharpness measure.
///
/// Uses a 3x3 Laplacian kernel: `[0,1,0; 1,-4,1; 0,1,0]`.
/// Higher variance = sharper image.
pub fn compute_laplacian_variance(img: &GrayImage) -> f32 {
    let (w, h) = (img.width(), img.height());
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = img.get_pixel(x, y).0[0] as f64;
            let top = img.get_pixel(x, y - 1).0[0] as f64;
            let bottom = img.get_pixel(x, y + 1).0[0] as f64;
            let left = img.get_pixel(x - 1, y).0[0] as f64;
            let right = img.get_pixel(x + 1, y).0[0] as f64;

            let laplacian = top + bottom + left + right - 4.0 * center;
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean) as f32
}

/// Compare two perceptual hashes and return similarity score (0.0-1.0)
pub fn hash_similarity(hash_a: &str, hash_b: &str) -> Option<f64> {
    let a = img_hash::ImageHash::<Box<[u8]>>::from_base64(hash_a).ok()?;
    let b = img_hash::ImageHash::<Box<[u8]>>::from_base64(hash_b).ok()?;

    let distance = a.dist(&b);
    let max_bits = (a.as_bytes().len() * 8).max(1) as f64;
    Some(1.0 - (distance as f64 / max_bits))
}
