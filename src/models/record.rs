use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Eye, SyncStatus};

/// Demographics captured on the intake step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub phone: Option<String>,
}

/// A decoded, validated eye photo. `data` holds the bytes exactly as captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub eye: Eye,
    pub mime_type: String,
    /// Dimensions after EXIF orientation is applied.
    pub width: u32,
    pub height: u32,
    /// Base64 SHA-256 of `data`.
    pub content_hash: String,
    pub perceptual_hash: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeAttachments {
    pub right_eye: Attachment,
    pub left_eye: Attachment,
}

impl EyeAttachments {
    pub fn get(&self, eye: Eye) -> &Attachment {
        match eye {
            Eye::Right => &self.right_eye,
            Eye::Left => &self.left_eye,
        }
    }
}

/// Output of the external classifier. `confidence` is a percentage (0-100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub label: String,
    pub confidence: f32,
}

/// A submitted screening. Only the `sync_*`, `next_attempt_at` and
/// `synced_at` fields change after `append`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningRecord {
    pub id: Uuid,
    pub patient: Patient,
    pub notes: Option<String>,
    pub attachments: EyeAttachments,
    pub result: Option<AnalysisResult>,
    pub recorded_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub sync_attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
}

/// The sync-mutable slice of a record, written as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncUpdate {
    pub status: SyncStatus,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl SyncUpdate {
    pub fn new(status: SyncStatus, attempts: u32) -> Self {
        Self {
            status,
            attempts,
            next_attempt_at: None,
        }
    }
}

/// A record due for submission, without its photo payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCandidate {
    pub id: Uuid,
    pub sync_status: SyncStatus,
    pub sync_attempts: u32,
}

/// Dashboard counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScreeningStats {
    pub total: u32,
    pub this_week: u32,
    pub pending: u32,
    pub syncing: u32,
    pub synced: u32,
    pub failed: u32,
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Fixed-width RFC 3339 with nanoseconds: survives the text round-trip
/// through SQLite unchanged and sorts lexically.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
