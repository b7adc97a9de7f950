use futures_util::future::BoxFuture;

use super::error::SyncError;
use crate::models::ScreeningRecord;

/// Remote endpoint that accepts screening records.
///
/// Submissions must be idempotent by `record.id`: the reconciler may send
/// the same record again after a timeout whose request actually landed.
pub trait SyncEndpoint: Send + Sync {
    fn submit_record<'a>(
        &'a self,
        record: &'a ScreeningRecord,
    ) -> BoxFuture<'a, Result<(), SyncError>>;
}
