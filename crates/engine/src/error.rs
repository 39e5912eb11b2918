//! Shared error types for the engine crate.

use thiserror::Error;

use exam_core::model::{AnswerError, ExamSessionError};
use storage::repository::StorageError;

/// Errors raised by a camera device.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera is not ready")]
    NotReady,
}

/// Errors raised by the detection capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DetectionError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Errors raised by the realtime transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport is not connected")]
    NotConnected,
}

/// Errors raised by the host's screen control.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScreenError {
    #[error("fullscreen request denied")]
    Denied,
}

/// Errors emitted by an `ExamBackend`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("backend request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `SessionController`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("a session is already active")]
    AlreadyActive,
    #[error("no active session")]
    NotActive,
    #[error("session was never started")]
    NotStarted,
    #[error("saved progress belongs to test {saved}, not {requested}")]
    ProgressMismatch { saved: String, requested: String },
    #[error("an earlier submission has not been delivered yet")]
    SubmissionPending,
    #[error("no submission is waiting to be retried")]
    NothingToRetry,
    #[error("{operation} timed out")]
    TimedOut { operation: &'static str },
    #[error("final submission failed; answers are kept for retry")]
    SubmissionFailed(#[source] Box<SessionError>),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Screen(#[from] ScreenError),
    #[error(transparent)]
    Exam(#[from] ExamSessionError),
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
