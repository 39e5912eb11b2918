use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{SessionId, StudentId, TestId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExamSessionError {
    #[error("test duration must be > 0 seconds")]
    ZeroDuration,

    #[error("test must contain at least one question")]
    NoQuestions,

    #[error("remaining time ({remaining}s) exceeds test duration ({total}s)")]
    RemainingExceedsTotal { remaining: u32, total: u32 },

    #[error("cannot move session from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Lifecycle of a single exam attempt.
///
/// `NotStarted → Active → {Submitted | Terminated}`; both end states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    Active,
    Terminated,
    Submitted,
}

impl SessionStatus {
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Submitted | Self::Terminated)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Active => "active",
            Self::Terminated => "terminated",
            Self::Submitted => "submitted",
        }
    }
}

//
// ─── SESSION IDENTITY ──────────────────────────────────────────────────────────
//

/// Identity carried on every join/leave and frame message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub session_id: SessionId,
    pub student_id: StudentId,
    pub student_name: String,
    pub test_id: TestId,
    pub test_title: String,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// Unvalidated input for creating an `ExamSession`.
#[derive(Debug, Clone)]
pub struct ExamSessionDraft {
    pub student_id: StudentId,
    pub student_name: String,
    pub test_id: TestId,
    pub test_title: String,
    pub question_count: u32,
    pub total_duration_seconds: u32,
    /// Seeded from a saved snapshot on resume; `None` starts from the full duration.
    pub remaining_seconds: Option<u32>,
}

impl ExamSessionDraft {
    /// Validate the draft and produce a `NotStarted` session.
    ///
    /// # Errors
    ///
    /// Returns `ExamSessionError` if the duration or question count is zero, or the
    /// seeded remaining time exceeds the total duration.
    pub fn validate(self, id: SessionId) -> Result<ExamSession, ExamSessionError> {
        if self.total_duration_seconds == 0 {
            return Err(ExamSessionError::ZeroDuration);
        }
        if self.question_count == 0 {
            return Err(ExamSessionError::NoQuestions);
        }
        let remaining = self.remaining_seconds.unwrap_or(self.total_duration_seconds);
        if remaining > self.total_duration_seconds {
            return Err(ExamSessionError::RemainingExceedsTotal {
                remaining,
                total: self.total_duration_seconds,
            });
        }

        Ok(ExamSession {
            meta: SessionMeta {
                session_id: id,
                student_id: self.student_id,
                student_name: self.student_name.trim().to_owned(),
                test_id: self.test_id,
                test_title: self.test_title.trim().to_owned(),
            },
            question_count: self.question_count,
            total_duration_seconds: self.total_duration_seconds,
            remaining_seconds: remaining,
            status: SessionStatus::NotStarted,
        })
    }
}

/// One timed attempt at a test by one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamSession {
    meta: SessionMeta,
    question_count: u32,
    total_duration_seconds: u32,
    remaining_seconds: u32,
    status: SessionStatus,
}

impl ExamSession {
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.meta.session_id
    }

    #[must_use]
    pub fn student_id(&self) -> &StudentId {
        &self.meta.student_id
    }

    #[must_use]
    pub fn test_id(&self) -> &TestId {
        &self.meta.test_id
    }

    #[must_use]
    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    #[must_use]
    pub fn question_count(&self) -> u32 {
        self.question_count
    }

    #[must_use]
    pub fn total_duration_seconds(&self) -> u32 {
        self.total_duration_seconds
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Record the clock's latest reading. Never exceeds the test duration.
    pub fn set_remaining_seconds(&mut self, remaining: u32) {
        self.remaining_seconds = remaining.min(self.total_duration_seconds);
    }

    /// # Errors
    ///
    /// Returns `ExamSessionError::InvalidTransition` unless the session is `NotStarted`.
    pub fn activate(&mut self) -> Result<(), ExamSessionError> {
        self.transition(SessionStatus::NotStarted, SessionStatus::Active)
    }

    /// # Errors
    ///
    /// Returns `ExamSessionError::InvalidTransition` unless the session is `Active`.
    pub fn mark_submitted(&mut self) -> Result<(), ExamSessionError> {
        self.transition(SessionStatus::Active, SessionStatus::Submitted)
    }

    /// # Errors
    ///
    /// Returns `ExamSessionError::InvalidTransition` unless the session is `Active`.
    pub fn mark_terminated(&mut self) -> Result<(), ExamSessionError> {
        self.transition(SessionStatus::Active, SessionStatus::Terminated)
    }

    fn transition(
        &mut self,
        expected: SessionStatus,
        to: SessionStatus,
    ) -> Result<(), ExamSessionError> {
        if self.status != expected {
            return Err(ExamSessionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
