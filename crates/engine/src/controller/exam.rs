use chrono::{DateTime, Utc};
use exam_core::model::{
    AnswerError, AnswerRecord, ExamProgress, ExamSession, NavigationState, ProgressSnapshot,
    SaveProgressPayload, SubmissionReason, SubmitPayload, ViolationEvent,
};

/// Everything the controller mutates for one attempt.
#[derive(Debug, Clone)]
pub(crate) struct ExamState {
    session: ExamSession,
    answers: AnswerRecord,
    navigation: NavigationState,
    violations: Vec<ViolationEvent>,
    warning_count: u32,
    ai_high_count: u32,
}

impl ExamState {
    pub(crate) fn new(session: ExamSession) -> Self {
        let navigation = NavigationState::new(session.question_count());
        Self {
            session,
            answers: AnswerRecord::new(),
            navigation,
            violations: Vec::new(),
            warning_count: 0,
            ai_high_count: 0,
        }
    }

    /// Rehydrate answers, navigation, and the warning tally from a save.
    pub(crate) fn resume(
        session: ExamSession,
        saved: &SaveProgressPayload,
    ) -> Result<Self, AnswerError> {
        let (answers, navigation) = saved.restore(session.question_count())?;
        Ok(Self {
            session,
            answers,
            navigation,
            violations: Vec::new(),
            warning_count: saved.warning_count,
            ai_high_count: 0,
        })
    }

    pub(crate) fn session(&self) -> &ExamSession {
        &self.session
    }

    pub(crate) fn session_mut(&mut self) -> &mut ExamSession {
        &mut self.session
    }

    pub(crate) fn answers(&self) -> &AnswerRecord {
        &self.answers
    }

    pub(crate) fn navigation(&self) -> &NavigationState {
        &self.navigation
    }

    pub(crate) fn navigation_mut(&mut self) -> &mut NavigationState {
        &mut self.navigation
    }

    pub(crate) fn violations(&self) -> &[ViolationEvent] {
        &self.violations
    }

    pub(crate) fn warning_count(&self) -> u32 {
        self.warning_count
    }

    pub(crate) fn ai_high_count(&self) -> u32 {
        self.ai_high_count
    }

    pub(crate) fn select_answer(&mut self, question: u32, option: u32) -> Result<(), AnswerError> {
        self.answers
            .select(question, option, self.session.question_count())?;
        Ok(())
    }

    pub(crate) fn clear_answer(&mut self, question: u32) -> Result<(), AnswerError> {
        let count = self.session.question_count();
        if question >= count {
            return Err(AnswerError::QuestionOutOfRange {
                index: question,
                count,
            });
        }
        self.answers.clear(question);
        Ok(())
    }

    /// Append to the log; returns the running tally of High AI detections.
    pub(crate) fn record_violation(&mut self, event: ViolationEvent) -> u32 {
        if event.counts_toward_ai_limit() {
            self.ai_high_count += 1;
        }
        self.warning_count += 1;
        self.violations.push(event);
        self.ai_high_count
    }

    pub(crate) fn snapshot(&self, saved_at: DateTime<Utc>) -> ProgressSnapshot {
        ProgressSnapshot {
            session_id: self.session.id(),
            student_id: self.session.student_id().clone(),
            test_id: self.session.test_id().clone(),
            question_count: self.session.question_count(),
            total_duration_seconds: self.session.total_duration_seconds(),
            remaining_seconds: self.session.remaining_seconds(),
            answers: self.answers.clone(),
            current_question: self.navigation.current_index(),
            visited: self.navigation.visited().clone(),
            marked_for_review: self.navigation.marked_for_review().clone(),
            warning_count: self.warning_count,
            saved_at,
        }
    }

    pub(crate) fn submit_payload(&self, reason: SubmissionReason) -> SubmitPayload {
        SubmitPayload {
            test_id: self.session.test_id().clone(),
            answers: self.answers.clone(),
            submission_reason: reason,
            warning_count: self.warning_count,
            time_remaining_seconds: self.session.remaining_seconds(),
        }
    }

    pub(crate) fn progress(&self) -> ExamProgress {
        ExamProgress::from_state(&self.answers, &self.navigation)
    }
}
