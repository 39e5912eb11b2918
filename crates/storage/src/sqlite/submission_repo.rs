use async_trait::async_trait;
use exam_core::model::{SubmissionReason, SubmissionReceipt, SubmitPayload};
use sqlx::Row;

use super::SqliteExamStore;
use super::mapping::{
    answers_from_json, answers_to_json, conn, ser, session_id_from_str, student_id_from_str,
    test_id_from_str, u32_from_i64,
};
use crate::repository::{StorageError, SubmissionRecord, SubmissionRepository};

fn map_submission_row(row: &sqlx::sqlite::SqliteRow) -> Result<SubmissionRecord, StorageError> {
    let session_id = session_id_from_str(&row.try_get::<String, _>("session_id").map_err(ser)?)?;
    let student_id = student_id_from_str(row.try_get("student_id").map_err(ser)?)?;
    let test_id = test_id_from_str(row.try_get("test_id").map_err(ser)?)?;
    let raw_reason: String = row.try_get("reason").map_err(ser)?;
    let submission_reason = SubmissionReason::parse(&raw_reason).ok_or_else(|| {
        StorageError::Serialization(format!("invalid submission reason: {raw_reason}"))
    })?;
    let answers = answers_from_json(&row.try_get::<String, _>("answers").map_err(ser)?)?;
    let warning_count = u32_from_i64(
        "warning_count",
        row.try_get::<i64, _>("warning_count").map_err(ser)?,
    )?;
    let time_remaining_seconds = u32_from_i64(
        "time_remaining_seconds",
        row.try_get::<i64, _>("time_remaining_seconds").map_err(ser)?,
    )?;
    let submitted_at = row.try_get("submitted_at").map_err(ser)?;

    Ok(SubmissionRecord {
        session_id,
        student_id,
        payload: SubmitPayload {
            test_id,
            answers,
            submission_reason,
            warning_count,
            time_remaining_seconds,
        },
        submitted_at,
    })
}

#[async_trait]
impl SubmissionRepository for SqliteExamStore {
    async fn record_submission(
        &self,
        record: &SubmissionRecord,
    ) -> Result<SubmissionReceipt, StorageError> {
        let session_id = record.session_id.to_string();
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let existing = sqlx::query("SELECT id, submitted_at FROM submissions WHERE session_id = ?1")
            .bind(&session_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;
        if let Some(row) = existing {
            return Ok(SubmissionReceipt {
                id: row.try_get("id").map_err(ser)?,
                submitted_at: row.try_get("submitted_at").map_err(ser)?,
            });
        }

        let payload = &record.payload;
        let res = sqlx::query(
            r"
                INSERT INTO submissions (
                    session_id, student_id, test_id, reason, answers,
                    warning_count, time_remaining_seconds, submitted_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(&session_id)
        .bind(record.student_id.as_str())
        .bind(payload.test_id.as_str())
        .bind(payload.submission_reason.as_str())
        .bind(answers_to_json(&payload.answers)?)
        .bind(i64::from(payload.warning_count))
        .bind(i64::from(payload.time_remaining_seconds))
        .bind(record.submitted_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;

        Ok(SubmissionReceipt {
            id: res.last_insert_rowid(),
            submitted_at: record.submitted_at,
        })
    }

    async fn get_submission(&self, id: i64) -> Result<SubmissionRecord, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    session_id, student_id, test_id, reason, answers,
                    warning_count, time_remaining_seconds, submitted_at
                FROM submissions
                WHERE id = ?1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        map_submission_row(&row)
    }
}
