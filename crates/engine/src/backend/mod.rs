//! Where progress and final submissions go.

mod http;
mod local;

pub use http::{HttpBackend, HttpBackendConfig};
pub use local::StorageBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    ProgressSnapshot, SaveProgressPayload, SessionMeta, StudentId, SubmissionReceipt,
    SubmitPayload, TestId,
};

use crate::error::BackendError;

/// Persistence and hand-in collaborator for the controller.
#[async_trait]
pub trait ExamBackend: Send + Sync {
    /// Store mid-attempt progress, replacing any earlier save.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` when the save cannot be stored.
    async fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<(), BackendError>;

    /// Fetch the last save for this candidate and test.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport or decoding failures.
    async fn load_progress(
        &self,
        student_id: &StudentId,
        test_id: &TestId,
    ) -> Result<Option<SaveProgressPayload>, BackendError>;

    /// Hand in the attempt. Repeating the call for the same session must not create
    /// a second submission.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` when the submission is not acknowledged.
    async fn submit(
        &self,
        meta: &SessionMeta,
        payload: &SubmitPayload,
        submitted_at: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, BackendError>;
}
