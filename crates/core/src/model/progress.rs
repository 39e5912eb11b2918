use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::model::answers::{AnswerError, AnswerRecord, NavigationState};
use crate::model::ids::{SessionId, StudentId, TestId};

//
// ─── SUBMISSION REASON ─────────────────────────────────────────────────────────
//

/// Why an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionReason {
    Manual,
    TimeUp,
    TabSwitchViolation,
    AiViolationLimit,
    CameraLost,
}

impl SubmissionReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::TimeUp => "time_up",
            Self::TabSwitchViolation => "tab_switch_violation",
            Self::AiViolationLimit => "ai_violation_limit",
            Self::CameraLost => "camera_lost",
        }
    }

    /// Parses the wire form back into a reason.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "manual" => Some(Self::Manual),
            "time_up" => Some(Self::TimeUp),
            "tab_switch_violation" => Some(Self::TabSwitchViolation),
            "ai_violation_limit" => Some(Self::AiViolationLimit),
            "camera_lost" => Some(Self::CameraLost),
            _ => None,
        }
    }
}

impl fmt::Display for SubmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── WIRE PAYLOADS ─────────────────────────────────────────────────────────────
//

/// Body sent to the storage collaborator on an explicit save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProgressPayload {
    pub test_id: TestId,
    pub answers: AnswerRecord,
    pub current_question: u32,
    pub marked_for_review: Vec<u32>,
    pub visited_questions: Vec<u32>,
    pub time_remaining_seconds: u32,
    pub warning_count: u32,
}

impl SaveProgressPayload {
    /// Rebuild answer and navigation state for a test with `question_count` questions.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError` if any stored index falls outside the test.
    pub fn restore(
        &self,
        question_count: u32,
    ) -> Result<(AnswerRecord, NavigationState), AnswerError> {
        let answers = AnswerRecord::from_persisted(self.answers.as_map().clone(), question_count)?;
        let navigation = NavigationState::from_persisted(
            self.current_question,
            self.visited_questions.iter().copied().collect(),
            self.marked_for_review.iter().copied().collect(),
            question_count,
        )?;
        Ok((answers, navigation))
    }
}

/// Body sent when the attempt is handed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
    pub test_id: TestId,
    pub answers: AnswerRecord,
    pub submission_reason: SubmissionReason,
    pub warning_count: u32,
    pub time_remaining_seconds: u32,
}

/// Acknowledgement returned once a submission is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub id: i64,
    pub submitted_at: DateTime<Utc>,
}

//
// ─── SNAPSHOT ──────────────────────────────────────────────────────────────────
//

/// Everything needed to resume an attempt where the candidate left off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub session_id: SessionId,
    pub student_id: StudentId,
    pub test_id: TestId,
    pub question_count: u32,
    pub total_duration_seconds: u32,
    pub remaining_seconds: u32,
    pub answers: AnswerRecord,
    pub current_question: u32,
    pub visited: BTreeSet<u32>,
    pub marked_for_review: BTreeSet<u32>,
    pub warning_count: u32,
    pub saved_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Rebuild the answer and navigation state captured in this snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError` if any stored index falls outside the test.
    pub fn restore(&self) -> Result<(AnswerRecord, NavigationState), AnswerError> {
        let answers =
            AnswerRecord::from_persisted(self.answers.as_map().clone(), self.question_count)?;
        let navigation = NavigationState::from_persisted(
            self.current_question,
            self.visited.clone(),
            self.marked_for_review.clone(),
            self.question_count,
        )?;
        Ok((answers, navigation))
    }

    #[must_use]
    pub fn to_save_payload(&self) -> SaveProgressPayload {
        SaveProgressPayload {
            test_id: self.test_id.clone(),
            answers: self.answers.clone(),
            current_question: self.current_question,
            marked_for_review: self.marked_for_review.iter().copied().collect(),
            visited_questions: self.visited.iter().copied().collect(),
            time_remaining_seconds: self.remaining_seconds,
            warning_count: self.warning_count,
        }
    }
}

//
// ─── PALETTE SUMMARY ───────────────────────────────────────────────────────────
//

/// Aggregated view of exam progress, useful for a question palette.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamProgress {
    pub total: u32,
    pub answered: u32,
    pub unanswered: u32,
    pub visited: u32,
    pub marked_for_review: u32,
}

impl ExamProgress {
    #[must_use]
    pub fn from_state(answers: &AnswerRecord, navigation: &NavigationState) -> Self {
        let total = navigation.question_count();
        let answered = u32::try_from(answers.len()).unwrap_or(u32::MAX).min(total);
        Self {
            total,
            answered,
            unanswered: total - answered,
            visited: u32::try_from(navigation.visited().len()).unwrap_or(u32::MAX),
            marked_for_review: u32::try_from(navigation.marked_for_review().len())
                .unwrap_or(u32::MAX),
        }
    }
}
