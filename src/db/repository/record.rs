use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::*;

/// Insert a record and both attachments in one transaction.
pub fn insert_record(conn: &Connection, record: &ScreeningRecord) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO screening_records (id, patient_name, patient_age, patient_gender,
         patient_phone, notes, result_label, result_confidence, recorded_by, created_at,
         sync_status, sync_attempts, next_attempt_at, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            record.id.to_string(),
            record.patient.name,
            record.patient.age,
            record.patient.gender,
            record.patient.phone,
            record.notes,
            record.result.as_ref().map(|r| r.label.clone()),
            record.result.as_ref().map(|r| r.confidence as f64),
            record.recorded_by,
            format_timestamp(&record.created_at),
            record.sync_status.as_str(),
            record.sync_attempts,
            record.next_attempt_at.as_ref().map(format_timestamp),
            record.synced_at.as_ref().map(format_timestamp),
        ],
    )?;

    for eye in Eye::BOTH {
        let attachment = record.attachments.get(eye);
        tx.execute(
            "INSERT INTO screening_attachments (record_id, eye, mime_type, width, height,
             content_hash, perceptual_hash, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id.to_string(),
                eye.as_str(),
                attachment.mime_type,
                attachment.width,
                attachment.height,
                attachment.content_hash,
                attachment.perceptual_hash,
                attachment.data,
            ],
        )?;
    }

    tx.commit()?;
    Ok(())
}

const RECORD_COLUMNS: &str = "id, patient_name, patient_age, patient_gender, patient_phone, notes,
     result_label, result_confidence, recorded_by, created_at, sync_status, sync_attempts,
     next_attempt_at, synced_at";

pub fn get_record(conn: &Connection, id: &Uuid) -> Result<Option<ScreeningRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM screening_records WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id.to_string()], read_record_row);

    match result {
        Ok(row) => Ok(Some(record_from_row(conn, row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All records in insertion order.
pub fn list_records(conn: &Connection) -> Result<Vec<ScreeningRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM screening_records ORDER BY seq ASC"
    ))?;
    let rows = stmt
        .query_map([], read_record_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|row| record_from_row(conn, row))
        .collect()
}

/// Records due for submission at `now`, oldest first: `pending` or `failed`
/// with no backoff window, or one that has elapsed. Photo payloads are not
/// loaded; the caller reads each record once it holds the claim.
pub fn list_sync_candidates(
    conn: &Connection,
    now: &DateTime<Utc>,
) -> Result<Vec<SyncCandidate>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, sync_status, sync_attempts FROM screening_records
         WHERE sync_status IN ('pending', 'failed')
           AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
         ORDER BY seq ASC",
    )?;
    let rows = stmt
        .query_map(params![format_timestamp(now)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, status, sync_attempts)| {
            let id = Uuid::parse_str(&id).map_err(|_| DatabaseError::InvalidEnum {
                field: "id".into(),
                value: id.clone(),
            })?;
            Ok(SyncCandidate {
                id,
                sync_status: SyncStatus::from_str(&status)?,
                sync_attempts,
            })
        })
        .collect()
}

/// Move a record from `pending` or `failed` to `syncing`. Returns false when
/// another pass already holds it or it has been synced.
pub fn claim_for_sync(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE screening_records SET sync_status = 'syncing'
         WHERE id = ?1 AND sync_status IN ('pending', 'failed')",
        params![id.to_string()],
    )?;
    Ok(changed == 1)
}

/// Write the sync-mutable fields of a record.
///
/// `synced` is terminal: any other status afterwards is rejected, and
/// `synced_at` keeps the time of the first acknowledgement.
pub fn update_sync_state(
    conn: &Connection,
    id: &Uuid,
    update: &SyncUpdate,
    now: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    let current: Option<String> = match tx.query_row(
        "SELECT sync_status FROM screening_records WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    ) {
        Ok(status) => Some(status),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => return Err(e.into()),
    };

    let current = match current {
        Some(s) => SyncStatus::from_str(&s)?,
        None => {
            return Err(DatabaseError::NotFound {
                entity_type: "ScreeningRecord".into(),
                id: id.to_string(),
            })
        }
    };

    if !current.can_transition_to(update.status) {
        return Err(DatabaseError::ConstraintViolation(format!(
            "sync status of {id} cannot move from {current} to {}",
            update.status
        )));
    }

    let synced_at = (update.status == SyncStatus::Synced).then(|| format_timestamp(now));

    tx.execute(
        "UPDATE screening_records SET
         sync_status = ?2,
         sync_attempts = ?3,
         next_attempt_at = ?4,
         synced_at = COALESCE(synced_at, ?5)
         WHERE id = ?1",
        params![
            id.to_string(),
            update.status.as_str(),
            update.attempts,
            update.next_attempt_at.as_ref().map(format_timestamp),
            synced_at,
        ],
    )?;

    tx.commit()?;
    Ok(())
}

/// Records left in `syncing` by an interrupted process go back to `pending`.
pub fn reset_interrupted_syncs(conn: &Connection) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE screening_records SET sync_status = 'pending' WHERE sync_status = 'syncing'",
        [],
    )?;
    Ok(changed)
}

/// Make rejected records eligible now, with a fresh attempt count.
pub fn requeue_failed_records(conn: &Connection) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE screening_records
         SET sync_status = 'pending', sync_attempts = 0, next_attempt_at = NULL
         WHERE sync_status = 'failed'",
        [],
    )?;
    Ok(changed)
}

pub fn screening_stats(
    conn: &Connection,
    now: &DateTime<Utc>,
) -> Result<ScreeningStats, DatabaseError> {
    let mut stats = ScreeningStats::default();

    let mut stmt = conn.prepare(
        "SELECT sync_status, COUNT(*) FROM screening_records GROUP BY sync_status",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
    })?;

    for row in rows {
        let (status, count) = row?;
        match SyncStatus::from_str(&status)? {
            SyncStatus::Pending => stats.pending = count,
            SyncStatus::Syncing => stats.syncing = count,
            SyncStatus::Synced => stats.synced = count,
            SyncStatus::Failed => stats.failed = count,
        }
        stats.total += count;
    }

    let week_ago = *now - Duration::days(7);
    stats.this_week = conn.query_row(
        "SELECT COUNT(*) FROM screening_records WHERE created_at > ?1",
        params![format_timestamp(&week_ago)],
        |row| row.get(0),
    )?;

    Ok(stats)
}

struct RecordRow {
    id: String,
    patient_name: String,
    patient_age: u32,
    patient_gender: String,
    patient_phone: Option<String>,
    notes: Option<String>,
    result_label: Option<String>,
    result_confidence: Option<f64>,
    recorded_by: Option<String>,
    created_at: String,
    sync_status: String,
    sync_attempts: u32,
    next_attempt_at: Option<String>,
    synced_at: Option<String>,
}

fn read_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        patient_name: row.get(1)?,
        patient_age: row.get(2)?,
        patient_gender: row.get(3)?,
        patient_phone: row.get(4)?,
        notes: row.get(5)?,
        result_label: row.get(6)?,
        result_confidence: row.get(7)?,
        recorded_by: row.get(8)?,
        created_at: row.get(9)?,
        sync_status: row.get(10)?,
        sync_attempts: row.get(11)?,
        next_attempt_at: row.get(12)?,
        synced_at: row.get(13)?,
    })
}

fn record_from_row(conn: &Connection, row: RecordRow) -> Result<ScreeningRecord, DatabaseError> {
    let id = Uuid::parse_str(&row.id).map_err(|_| DatabaseError::InvalidEnum {
        field: "id".into(),
        value: row.id.clone(),
    })?;

    let created_at = parse_timestamp(&row.created_at).ok_or_else(|| DatabaseError::InvalidEnum {
        field: "created_at".into(),
        value: row.created_at.clone(),
    })?;

    let result = match (row.result_label, row.result_confidence) {
        (Some(label), Some(confidence)) => Some(AnalysisResult {
            label,
            confidence: confidence as f32,
        }),
        _ => None,
    };

    let right_eye = load_attachment(conn, &row.id, Eye::Right)?;
    let left_eye = load_attachment(conn, &row.id, Eye::Left)?;

    Ok(ScreeningRecord {
        id,
        patient: Patient {
            name: row.patient_name,
            age: row.patient_age,
            gender: row.patient_gender,
            phone: row.patient_phone,
        },
        notes: row.notes,
        attachments: EyeAttachments {
            right_eye,
            left_eye,
        },
        result,
        recorded_by: row.recorded_by,
        created_at,
        sync_status: SyncStatus::from_str(&row.sync_status)?,
        sync_attempts: row.sync_attempts,
        next_attempt_at: row.next_attempt_at.as_deref().and_then(parse_timestamp),
        synced_at: row.synced_at.as_deref().and_then(parse_timestamp),
    })
}

fn load_attachment(conn: &Connection, record_id: &str, eye: Eye) -> Result<Attachment, DatabaseError> {
    let result = conn.query_row(
        "SELECT mime_type, width, height, content_hash, perceptual_hash, data
         FROM screening_attachments WHERE record_id = ?1 AND eye = ?2",
        params![record_id, eye.as_str()],
        |row| {
            Ok(Attachment {
                eye,
                mime_type: row.get(0)?,
                width: row.get(1)?,
                height: row.get(2)?,
                content_hash: row.get(3)?,
                perceptual_hash: row.get(4)?,
                data: row.get(5)?,
            })
        },
    );

    match result {
        Ok(attachment) => Ok(attachment),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(DatabaseError::NotFound {
            entity_type: format!("{eye} eye attachment"),
            id: record_id.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}
