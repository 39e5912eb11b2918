use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    ProgressSnapshot, SessionId, StudentId, SubmissionReceipt, SubmitPayload, TestId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A stored final hand-in, keyed by the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub session_id: SessionId,
    pub student_id: StudentId,
    pub payload: SubmitPayload,
    pub submitted_at: DateTime<Utc>,
}

/// Saved mid-attempt progress. One slot per (student, test); saving overwrites.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Persist or replace the snapshot for the snapshot's student and test.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be stored.
    async fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<(), StorageError>;

    /// Fetch the saved snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn load_progress(
        &self,
        student_id: &StudentId,
        test_id: &TestId,
    ) -> Result<Option<ProgressSnapshot>, StorageError>;

    /// Drop the saved snapshot once the attempt has been handed in.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection failures. Missing rows are not an error.
    async fn clear_progress(
        &self,
        student_id: &StudentId,
        test_id: &TestId,
    ) -> Result<(), StorageError>;
}

/// Final submissions.
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Store a submission. Re-submitting the same attempt returns the first receipt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the submission cannot be stored.
    async fn record_submission(
        &self,
        record: &SubmissionRecord,
    ) -> Result<SubmissionReceipt, StorageError>;

    /// Fetch a submission by receipt id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_submission(&self, id: i64) -> Result<SubmissionRecord, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<HashMap<(StudentId, TestId), ProgressSnapshot>>>,
    submissions: Arc<Mutex<Vec<SubmissionRecord>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored submissions; handy for double-submission assertions.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn submission_count(&self) -> Result<usize, StorageError> {
        let guard = self
            .submissions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.len())
    }
}

fn receipt_for(index: usize, record: &SubmissionRecord) -> Result<SubmissionReceipt, StorageError> {
    let id = i64::try_from(index + 1)
        .map_err(|_| StorageError::Serialization("submission id overflow".into()))?;
    Ok(SubmissionReceipt {
        id,
        submitted_at: record.submitted_at,
    })
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(
            (snapshot.student_id.clone(), snapshot.test_id.clone()),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn load_progress(
        &self,
        student_id: &StudentId,
        test_id: &TestId,
    ) -> Result<Option<ProgressSnapshot>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(student_id.clone(), test_id.clone())).cloned())
    }

    async fn clear_progress(
        &self,
        student_id: &StudentId,
        test_id: &TestId,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&(student_id.clone(), test_id.clone()));
        Ok(())
    }
}

#[async_trait]
impl SubmissionRepository for InMemoryRepository {
    async fn record_submission(
        &self,
        record: &SubmissionRecord,
    ) -> Result<SubmissionReceipt, StorageError> {
        let mut guard = self
            .submissions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if let Some(index) = guard
            .iter()
            .position(|existing| existing.session_id == record.session_id)
        {
            return receipt_for(index, &guard[index]);
        }
        guard.push(record.clone());
        receipt_for(guard.len() - 1, record)
    }

    async fn get_submission(&self, id: i64) -> Result<SubmissionRecord, StorageError> {
        let guard = self
            .submissions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| guard.get(index))
            .cloned()
            .ok_or(StorageError::NotFound)
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub submissions: Arc<dyn SubmissionRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let submissions: Arc<dyn SubmissionRepository> = Arc::new(repo);
        Self {
            progress,
            submissions,
        }
    }
}
