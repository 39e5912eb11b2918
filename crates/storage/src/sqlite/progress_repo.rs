use async_trait::async_trait;
use exam_core::model::{ProgressSnapshot, StudentId, TestId};
use sqlx::Row;

use super::SqliteExamStore;
use super::mapping::{
    answers_from_json, answers_to_json, conn, indices_from_json, indices_to_json, ser,
    session_id_from_str, student_id_from_str, test_id_from_str, u32_from_i64,
};
use crate::repository::{ProgressRepository, StorageError};

fn map_progress_row(row: &sqlx::sqlite::SqliteRow) -> Result<ProgressSnapshot, StorageError> {
    let session_id = session_id_from_str(&row.try_get::<String, _>("session_id").map_err(ser)?)?;
    let student_id = student_id_from_str(row.try_get("student_id").map_err(ser)?)?;
    let test_id = test_id_from_str(row.try_get("test_id").map_err(ser)?)?;
    let question_count = u32_from_i64(
        "question_count",
        row.try_get::<i64, _>("question_count").map_err(ser)?,
    )?;
    let total_duration_seconds = u32_from_i64(
        "total_duration_seconds",
        row.try_get::<i64, _>("total_duration_seconds").map_err(ser)?,
    )?;
    let remaining_seconds = u32_from_i64(
        "remaining_seconds",
        row.try_get::<i64, _>("remaining_seconds").map_err(ser)?,
    )?;
    let current_question = u32_from_i64(
        "current_question",
        row.try_get::<i64, _>("current_question").map_err(ser)?,
    )?;
    let warning_count = u32_from_i64(
        "warning_count",
        row.try_get::<i64, _>("warning_count").map_err(ser)?,
    )?;
    let answers = answers_from_json(&row.try_get::<String, _>("answers").map_err(ser)?)?;
    let visited = indices_from_json(&row.try_get::<String, _>("visited").map_err(ser)?)?;
    let marked_for_review =
        indices_from_json(&row.try_get::<String, _>("marked_for_review").map_err(ser)?)?;
    let saved_at = row.try_get("saved_at").map_err(ser)?;

    Ok(ProgressSnapshot {
        session_id,
        student_id,
        test_id,
        question_count,
        total_duration_seconds,
        remaining_seconds,
        answers,
        current_question,
        visited,
        marked_for_review,
        warning_count,
        saved_at,
    })
}

#[async_trait]
impl ProgressRepository for SqliteExamStore {
    async fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO progress_snapshots (
                    student_id, test_id, session_id, question_count,
                    total_duration_seconds, remaining_seconds, answers,
                    current_question, visited, marked_for_review,
                    warning_count, saved_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(student_id, test_id) DO UPDATE SET
                    session_id = excluded.session_id,
                    question_count = excluded.question_count,
                    total_duration_seconds = excluded.total_duration_seconds,
                    remaining_seconds = excluded.remaining_seconds,
                    answers = excluded.answers,
                    current_question = excluded.current_question,
                    visited = excluded.visited,
                    marked_for_review = excluded.marked_for_review,
                    warning_count = excluded.warning_count,
                    saved_at = excluded.saved_at
            ",
        )
        .bind(snapshot.student_id.as_str())
        .bind(snapshot.test_id.as_str())
        .bind(snapshot.session_id.to_string())
        .bind(i64::from(snapshot.question_count))
        .bind(i64::from(snapshot.total_duration_seconds))
        .bind(i64::from(snapshot.remaining_seconds))
        .bind(answers_to_json(&snapshot.answers)?)
        .bind(i64::from(snapshot.current_question))
        .bind(indices_to_json(&snapshot.visited)?)
        .bind(indices_to_json(&snapshot.marked_for_review)?)
        .bind(i64::from(snapshot.warning_count))
        .bind(snapshot.saved_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn load_progress(
        &self,
        student_id: &StudentId,
        test_id: &TestId,
    ) -> Result<Option<ProgressSnapshot>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    student_id, test_id, session_id, question_count,
                    total_duration_seconds, remaining_seconds, answers,
                    current_question, visited, marked_for_review,
                    warning_count, saved_at
                FROM progress_snapshots
                WHERE student_id = ?1 AND test_id = ?2
            ",
        )
        .bind(student_id.as_str())
        .bind(test_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_progress_row).transpose()
    }

    async fn clear_progress(
        &self,
        student_id: &StudentId,
        test_id: &TestId,
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM progress_snapshots WHERE student_id = ?1 AND test_id = ?2")
            .bind(student_id.as_str())
            .bind(test_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }
}
