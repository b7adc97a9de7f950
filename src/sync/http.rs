//! HTTP adapter for the remote screening endpoint.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use uuid::Uuid;

use super::error::SyncError;
use super::traits::SyncEndpoint;
use crate::models::{AnalysisResult, EyeAttachments, Patient, ScreeningRecord};

/// `PUT <base>/screenings/<id>`. Keyed by the record id, so a retried
/// submission overwrites instead of duplicating.
pub struct HttpSyncEndpoint {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpSyncEndpoint {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

/// Wire body: the immutable part of a record. Local sync bookkeeping stays on the device.
#[derive(Serialize)]
struct RecordPayload<'a> {
    id: &'a Uuid,
    patient: &'a Patient,
    notes: Option<&'a str>,
    attachments: &'a EyeAttachments,
    result: Option<&'a AnalysisResult>,
    recorded_by: Option<&'a str>,
    created_at: &'a DateTime<Utc>,
}

impl<'a> From<&'a ScreeningRecord> for RecordPayload<'a> {
    fn from(record: &'a ScreeningRecord) -> Self {
        Self {
            id: &record.id,
            patient: &record.patient,
            notes: record.notes.as_deref(),
            attachments: &record.attachments,
            result: record.result.as_ref(),
            recorded_by: record.recorded_by.as_deref(),
            created_at: &record.created_at,
        }
    }
}

impl SyncEndpoint for HttpSyncEndpoint {
    fn submit_record<'a>(
        &'a self,
        record: &'a ScreeningRecord,
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        Box::pin(async move {
            let url = format!("{}/screenings/{}", self.base_url, record.id);

            let response = self
                .client
                .put(&url)
                .json(&RecordPayload::from(record))
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        SyncError::Timeout(self.timeout_secs)
                    } else if e.is_connect() {
                        SyncError::Connection(self.base_url.clone())
                    } else {
                        SyncError::HttpClient(e.to_string())
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SyncError::from_status(status.as_u16(), body));
            }
            Ok(())
        })
    }
}
