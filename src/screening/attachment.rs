//! Attachment Pipeline: turns raw camera bytes into a validated `Attachment`.
//!
//! Decoding happens synchronously inside `capture` so a bad payload is
//! rejected before it reaches the draft. Quality checks run afterwards.

use std::io::Cursor;

use base64::Engine;
use image::{DynamicImage, GenericImageView, ImageFormat};
use sha2::{Digest, Sha256};

use super::error::WorkflowError;
use crate::config::WorkflowConfig;
use crate::models::{Attachment, Eye};

/// A captured photo with its decoded, orientation-corrected pixels.
#[derive(Debug)]
pub struct DecodedPhoto {
    pub attachment: Attachment,
    pub image: DynamicImage,
}

/// Validate and decode a photo for `eye`. The stored bytes are the originals.
pub fn decode_photo(
    eye: Eye,
    raw: Vec<u8>,
    config: &WorkflowConfig,
) -> Result<DecodedPhoto, WorkflowError> {
    validate_image_bytes(&raw, config)?;

    let format = image::guess_format(&raw)
        .map_err(|_| WorkflowError::InvalidImage("Unrecognized image format".into()))?;
    let mime_type = mime_for(format)
        .ok_or_else(|| WorkflowError::InvalidImage(format!("Unsupported image format: {format:?}")))?;

    let decoded = image::load_from_memory_with_format(&raw, format)
        .map_err(|e| WorkflowError::InvalidImage(format!("Failed to decode image: {e}")))?;
    let image = apply_orientation(decoded, read_exif_orientation(&raw));
    let (width, height) = image.dimensions();

    let attachment = Attachment {
        eye,
        mime_type: mime_type.to_string(),
        width,
        height,
        content_hash: content_hash(&raw),
        perceptual_hash: Some(perceptual_hash(&image)),
        data: raw,
    };

    Ok(DecodedPhoto { attachment, image })
}

fn validate_image_bytes(bytes: &[u8], config: &WorkflowConfig) -> Result<(), WorkflowError> {
    if bytes.len() < config.min_image_bytes {
        return Err(WorkflowError::InvalidImage(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > config.max_image_bytes {
        return Err(WorkflowError::InvalidImage(format!(
            "Image data exceeds {}MB limit",
            config.max_image_bytes / (1024 * 1024)
        )));
    }
    Ok(())
}

fn mime_for(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Tiff => Some("image/tiff"),
        _ => None,
    }
}

/// Base64 SHA-256 of the raw bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// DoubleGradient perceptual hash (256-bit), for near-duplicate detection.
pub fn perceptual_hash(image: &DynamicImage) -> String {
    let hasher = img_hash::HasherConfig::new()
        .hash_alg(img_hash::HashAlg::DoubleGradient)
        .hash_size(16, 16)
        .to_hasher();
    hasher.hash_image(image).to_base64()
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform (1-8) to a `DynamicImage`.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
