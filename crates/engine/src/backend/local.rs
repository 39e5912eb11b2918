use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    ProgressSnapshot, SaveProgressPayload, SessionMeta, StudentId, SubmissionReceipt,
    SubmitPayload, TestId,
};
use storage::repository::{Storage, SubmissionRecord};

use super::ExamBackend;
use crate::error::BackendError;

/// Backend over the local repositories (SQLite or in-memory).
#[derive(Clone)]
pub struct StorageBackend {
    storage: Storage,
}

impl StorageBackend {
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Storage::in_memory())
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

#[async_trait]
impl ExamBackend for StorageBackend {
    async fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<(), BackendError> {
        self.storage.progress.save_progress(snapshot).await?;
        Ok(())
    }

    async fn load_progress(
        &self,
        student_id: &StudentId,
        test_id: &TestId,
    ) -> Result<Option<SaveProgressPayload>, BackendError> {
        let snapshot = self.storage.progress.load_progress(student_id, test_id).await?;
        Ok(snapshot.map(|snapshot| snapshot.to_save_payload()))
    }

    async fn submit(
        &self,
        meta: &SessionMeta,
        payload: &SubmitPayload,
        submitted_at: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, BackendError> {
        let record = SubmissionRecord {
            session_id: meta.session_id,
            student_id: meta.student_id.clone(),
            payload: payload.clone(),
            submitted_at,
        };
        let receipt = self.storage.submissions.record_submission(&record).await?;
        self.storage
            .progress
            .clear_progress(&meta.student_id, &meta.test_id)
            .await?;
        Ok(receipt)
    }
}
