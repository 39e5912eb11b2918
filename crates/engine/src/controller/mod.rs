//! The session state machine.
//!
//! `SessionController` is the only place exam state changes. Background components
//! report through a per-session event channel; the host forwards candidate actions
//! and window changes as method calls. Every escalation path (time up, tab switches,
//! AI violation limit, camera loss, manual finish) funnels into one `submit` or
//! `terminate`, both of which are idempotent.

mod exam;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use exam_core::model::{
    AnswerRecord, ExamProgress, ExamSessionDraft, NavigationState, ProgressSnapshot,
    SaveProgressPayload, SessionId, SessionMeta, SessionStatus, StudentId, SubmissionReason,
    SubmissionReceipt, SubmitPayload, TestId, ViolationEvent,
};
use exam_core::{Clock, ProctorSettings};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::backend::ExamBackend;
use crate::camera::{CameraAccess, CameraFeed};
use crate::clock::SessionClock;
use crate::detector::{DetectionCapability, DetectorStatus, ViolationDetector};
use crate::error::SessionError;
use crate::event::{EventReceiver, SessionEvent};
use crate::guard::{EnvironmentGuard, EnvironmentState, GuardSignal, ScreenControl};
use crate::streamer::{ConnectionPhase, ConnectionState, TelemetryStreamer, Transport};
use crate::tasks::TaskGroup;
use exam::ExamState;

/// External collaborators a session needs.
#[derive(Clone)]
pub struct SessionDeps {
    pub detection: Arc<dyn DetectionCapability>,
    pub transport: Arc<dyn Transport>,
    pub camera: Arc<dyn CameraAccess>,
    pub screen: Arc<dyn ScreenControl>,
    pub backend: Arc<dyn ExamBackend>,
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Answers were handed in. `receipt` is `None` while the submission still awaits
    /// a successful retry.
    Submitted {
        reason: SubmissionReason,
        receipt: Option<SubmissionReceipt>,
    },
    /// Ended without a final answer submission.
    Terminated { reason: SubmissionReason },
}

impl SessionOutcome {
    #[must_use]
    pub fn reason(&self) -> SubmissionReason {
        match self {
            Self::Submitted { reason, .. } | Self::Terminated { reason } => *reason,
        }
    }
}

pub struct SessionController {
    settings: ProctorSettings,
    clock: Clock,
    deps: SessionDeps,
    exam: Option<ExamState>,
    guard: EnvironmentGuard,
    countdown: Option<SessionClock>,
    tasks: TaskGroup,
    feed: Option<Arc<dyn CameraFeed>>,
    events: Option<EventReceiver>,
    detector_status: Option<DetectorStatus>,
    connection: ConnectionState,
    pending_submission: Option<SubmitPayload>,
    outcome: Option<SessionOutcome>,
}

impl SessionController {
    #[must_use]
    pub fn new(settings: ProctorSettings, clock: Clock, deps: SessionDeps) -> Self {
        let guard = EnvironmentGuard::new(settings.tab_switch_threshold());
        Self {
            settings,
            clock,
            deps,
            exam: None,
            guard,
            countdown: None,
            tasks: TaskGroup::new(),
            feed: None,
            events: None,
            detector_status: None,
            connection: ConnectionState::default(),
            pending_submission: None,
            outcome: None,
        }
    }

    //
    // ─── LIFECYCLE ─────────────────────────────────────────────────────────────
    //

    /// Start a fresh attempt.
    ///
    /// Opens the camera, requests fullscreen, then starts the clock, the detector,
    /// the streamer, and the environment guard. A refused fullscreen request does not
    /// block the session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyActive` while another attempt runs,
    /// `SessionError::SubmissionPending` while an earlier hand-in awaits retry, validation
    /// errors for a bad draft, or `SessionError::Camera` if the camera cannot be
    /// opened (the session then stays unstarted).
    pub async fn start(&mut self, draft: ExamSessionDraft) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let session = draft.validate(SessionId::generate())?;
        self.launch(ExamState::new(session)).await
    }

    /// Resume an attempt from saved progress.
    ///
    /// Remaining time is taken from the save, not from the full duration.
    ///
    /// # Errors
    ///
    /// As for [`start`](Self::start), plus `SessionError::ProgressMismatch` when the
    /// save belongs to another test and `SessionError::Answer` when it references
    /// questions the test does not have.
    pub async fn resume(
        &mut self,
        mut draft: ExamSessionDraft,
        saved: &SaveProgressPayload,
    ) -> Result<(), SessionError> {
        self.ensure_idle()?;
        if saved.test_id != draft.test_id {
            return Err(SessionError::ProgressMismatch {
                saved: saved.test_id.to_string(),
                requested: draft.test_id.to_string(),
            });
        }
        draft.remaining_seconds = Some(
            saved
                .time_remaining_seconds
                .min(draft.total_duration_seconds),
        );
        let session = draft.validate(SessionId::generate())?;
        let exam = ExamState::resume(session, saved)?;
        info!(
            test_id = %saved.test_id,
            remaining = saved.time_remaining_seconds,
            "resuming from saved progress"
        );
        self.launch(exam).await
    }

    /// Fetch the candidate's last save, if any, for a later [`resume`](Self::resume).
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Backend` or `SessionError::TimedOut`.
    pub async fn load_saved_progress(
        &self,
        student_id: &StudentId,
        test_id: &TestId,
    ) -> Result<Option<SaveProgressPayload>, SessionError> {
        with_timeout(
            self.settings.network_timeout(),
            "progress load",
            self.deps.backend.load_progress(student_id, test_id),
        )
        .await
    }

    /// Abandon the active attempt without submitting.
    ///
    /// Every component is torn down and the in-memory session is dropped; only an
    /// explicit save survives. Does nothing once the attempt has ended, so a pending
    /// submission is never discarded.
    pub async fn stop(&mut self) {
        if !self.is_active() {
            return;
        }
        info!("abandoning active session");
        self.teardown().await;
        self.exam = None;
        self.outcome = None;
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.is_active() {
            return Err(SessionError::AlreadyActive);
        }
        if self.pending_submission.is_some() {
            return Err(SessionError::SubmissionPending);
        }
        Ok(())
    }

    async fn launch(&mut self, mut exam: ExamState) -> Result<(), SessionError> {
        let limit = self.settings.network_timeout();
        let feed = match tokio::time::timeout(limit, self.deps.camera.open()).await {
            Ok(Ok(feed)) => feed,
            Ok(Err(err)) => {
                warn!(error = %err, "camera could not be opened, session not started");
                return Err(err.into());
            }
            Err(_) => {
                return Err(SessionError::TimedOut {
                    operation: "camera open",
                });
            }
        };

        let requested = tokio::time::timeout(limit, self.deps.screen.request_fullscreen()).await;
        let fullscreen = match requested {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(error = %err, "fullscreen refused, continuing");
                false
            }
            Err(_) => {
                warn!("fullscreen request timed out, continuing");
                false
            }
        };

        if let Err(err) = exam.session_mut().activate() {
            feed.release();
            return Err(err.into());
        }

        // Anything left from a previous attempt must not outlive this point.
        self.tasks.shutdown();
        self.tasks = TaskGroup::new();
        self.outcome = None;
        self.pending_submission = None;
        self.connection = ConnectionState::default();
        self.detector_status = None;
        self.guard = EnvironmentGuard::new(self.settings.tab_switch_threshold());
        self.guard.start(fullscreen);

        let (tx, rx) = mpsc::unbounded_channel();
        let meta = exam.session().meta().clone();

        let detector =
            ViolationDetector::new(self.settings.clone(), Arc::clone(&self.deps.detection));
        let snapshots = detector.snapshots();
        let detector_token = self.tasks.child_token();
        self.tasks.spawn(detector.run(
            Arc::clone(&feed),
            self.clock,
            tx.clone(),
            detector_token,
        ));

        TelemetryStreamer::new(
            self.settings.clone(),
            Arc::clone(&self.deps.transport),
            Arc::clone(&feed),
            meta.clone(),
            snapshots,
            self.clock,
        )
        .spawn(&mut self.tasks, tx.clone());

        let clock_token = self.tasks.child_token();
        self.countdown = Some(SessionClock::start(
            exam.session().remaining_seconds(),
            tx,
            &clock_token,
        ));

        info!(
            session_id = %meta.session_id,
            student_id = %meta.student_id,
            test_id = %meta.test_id,
            remaining = exam.session().remaining_seconds(),
            fullscreen,
            "exam session started"
        );
        self.exam = Some(exam);
        self.feed = Some(feed);
        self.events = Some(rx);
        Ok(())
    }

    //
    // ─── CANDIDATE ACTIONS ─────────────────────────────────────────────────────
    //

    /// # Errors
    ///
    /// Returns `SessionError::NotActive` outside an active attempt, or
    /// `SessionError::Answer` for an unknown question.
    pub fn select_answer(&mut self, question: u32, option: u32) -> Result<(), SessionError> {
        self.active_exam()?.select_answer(question, option)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionError::NotActive` outside an active attempt, or
    /// `SessionError::Answer` for an unknown question.
    pub fn clear_answer(&mut self, question: u32) -> Result<(), SessionError> {
        self.active_exam()?.clear_answer(question)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionError::NotActive` outside an active attempt, or
    /// `SessionError::Answer` for an unknown question.
    pub fn go_to(&mut self, index: u32) -> Result<(), SessionError> {
        self.active_exam()?.navigation_mut().go_to(index)?;
        Ok(())
    }

    /// Returns `false` on the last question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotActive` outside an active attempt.
    pub fn next_question(&mut self) -> Result<bool, SessionError> {
        Ok(self.active_exam()?.navigation_mut().next())
    }

    /// Returns `false` on the first question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotActive` outside an active attempt.
    pub fn previous_question(&mut self) -> Result<bool, SessionError> {
        Ok(self.active_exam()?.navigation_mut().previous())
    }

    /// Returns whether the question is now marked.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotActive` outside an active attempt, or
    /// `SessionError::Answer` for an unknown question.
    pub fn toggle_review(&mut self, index: u32) -> Result<bool, SessionError> {
        Ok(self.active_exam()?.navigation_mut().toggle_review(index)?)
    }

    /// Persist the current state. There is no autosave; this is the only way
    /// progress reaches storage before submission.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotActive` outside an active attempt, or the backend
    /// failure (the session itself is unaffected).
    pub async fn save_progress(&mut self) -> Result<ProgressSnapshot, SessionError> {
        let remaining = self.countdown_remaining();
        let saved_at = self.clock.now();
        let exam = self.active_exam()?;
        if let Some(remaining) = remaining {
            exam.session_mut().set_remaining_seconds(remaining);
        }
        let snapshot = exam.snapshot(saved_at);

        with_timeout(
            self.settings.network_timeout(),
            "progress save",
            self.deps.backend.save_progress(&snapshot),
        )
        .await?;
        info!(
            remaining = snapshot.remaining_seconds,
            answered = snapshot.answers.len(),
            "progress saved"
        );
        Ok(snapshot)
    }

    /// Hand in the attempt on the candidate's request.
    ///
    /// Calling it again after the session ended returns the existing outcome.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotStarted` without an attempt, or
    /// `SessionError::SubmissionFailed` when the hand-in was not acknowledged; the
    /// session is still `Submitted` and [`retry_submission`](Self::retry_submission)
    /// resends it.
    pub async fn finish(&mut self) -> Result<SessionOutcome, SessionError> {
        if let Some(outcome) = self.submit(SubmissionReason::Manual).await? {
            return Ok(outcome);
        }
        self.outcome.clone().ok_or(SessionError::NotActive)
    }

    /// Resend a submission that failed to reach the backend.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NothingToRetry` when no submission is pending, or
    /// `SessionError::SubmissionFailed` if it fails again.
    pub async fn retry_submission(&mut self) -> Result<SubmissionReceipt, SessionError> {
        self.deliver_pending().await
    }

    //
    // ─── ENVIRONMENT ───────────────────────────────────────────────────────────
    //

    /// Forward a window visibility or focus change.
    ///
    /// Returns the outcome if this switch reached the limit and ended the session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SubmissionFailed` if the forced hand-in fails.
    pub async fn on_visibility_change(
        &mut self,
        visible: bool,
    ) -> Result<Option<SessionOutcome>, SessionError> {
        match self.guard.on_visibility_change(visible, self.clock.now()) {
            Some(GuardSignal::Warning(event)) => {
                self.log_violation(event);
                Ok(None)
            }
            Some(GuardSignal::Terminal(event)) => {
                self.log_violation(event);
                self.submit(SubmissionReason::TabSwitchViolation).await
            }
            _ => Ok(None),
        }
    }

    /// Forward a fullscreen change. Returns whether the candidate must be prompted to
    /// return to fullscreen.
    pub fn on_fullscreen_change(&mut self, fullscreen: bool) -> bool {
        if let Some(GuardSignal::FullscreenLost) = self.guard.on_fullscreen_change(fullscreen) {
            debug!("prompting candidate to return to fullscreen");
        }
        self.guard.needs_fullscreen_prompt()
    }

    /// Ask the host to re-enter fullscreen, as the prompt's action.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotActive` outside an active attempt, or the host's
    /// refusal.
    pub async fn request_fullscreen(&mut self) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::NotActive);
        }
        with_timeout(
            self.settings.network_timeout(),
            "fullscreen request",
            self.deps.screen.request_fullscreen(),
        )
        .await?;
        self.guard.on_fullscreen_change(true);
        Ok(())
    }

    //
    // ─── EVENTS ────────────────────────────────────────────────────────────────
    //

    /// Wait for the next background event. `None` once the session is torn down.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.as_mut()?.recv().await
    }

    /// Apply one background event. Events arriving after the session ended are
    /// discarded.
    ///
    /// Returns the outcome when this event ended the session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SubmissionFailed` if a forced hand-in fails.
    pub async fn handle_event(
        &mut self,
        event: SessionEvent,
    ) -> Result<Option<SessionOutcome>, SessionError> {
        if !self.is_active() {
            debug!(?event, "discarding event for inactive session");
            return Ok(None);
        }

        match event {
            SessionEvent::ClockTick { remaining_seconds } => {
                if let Some(exam) = self.exam.as_mut() {
                    exam.session_mut().set_remaining_seconds(remaining_seconds);
                }
                Ok(None)
            }
            SessionEvent::ClockExpired => {
                if let Some(exam) = self.exam.as_mut() {
                    exam.session_mut().set_remaining_seconds(0);
                }
                info!("time is up");
                self.submit(SubmissionReason::TimeUp).await
            }
            SessionEvent::Violation(violation) => {
                let high = self.log_violation(violation);
                let limit = self.settings.ai_violation_limit();
                if high >= limit {
                    warn!(high, limit, "AI violation limit reached");
                    return self.submit(SubmissionReason::AiViolationLimit).await;
                }
                Ok(None)
            }
            SessionEvent::Detector(status) => {
                if let DetectorStatus::Unavailable { attempts, error } = &status {
                    warn!(attempts, %error, "AI detection disabled for this session");
                }
                self.detector_status = Some(status);
                Ok(None)
            }
            SessionEvent::Connection(state) => {
                if state.phase == ConnectionPhase::Failed
                    && self.connection.phase != ConnectionPhase::Failed
                {
                    warn!("live monitoring unavailable, exam continues");
                }
                self.connection = state;
                Ok(None)
            }
            SessionEvent::CameraLost { reason } => {
                self.log_violation(ViolationEvent::camera_lost(&reason, self.clock.now()));
                self.terminate(SubmissionReason::CameraLost).await
            }
        }
    }

    /// Drive the session from background events alone until it ends.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotActive` if the event stream closes without an
    /// outcome, or the error from a failed forced hand-in.
    pub async fn run_until_finished(&mut self) -> Result<SessionOutcome, SessionError> {
        while let Some(event) = self.next_event().await {
            if let Some(outcome) = self.handle_event(event).await? {
                return Ok(outcome);
            }
        }
        self.outcome.clone().ok_or(SessionError::NotActive)
    }

    //
    // ─── ESCALATION ────────────────────────────────────────────────────────────
    //

    /// Hand in the attempt. Only the first call while `Active` does anything.
    async fn submit(
        &mut self,
        reason: SubmissionReason,
    ) -> Result<Option<SessionOutcome>, SessionError> {
        let remaining = self.countdown_remaining();
        let exam = self.exam.as_mut().ok_or(SessionError::NotStarted)?;
        if !exam.session().is_active() {
            debug!(%reason, "session already ended, ignoring submit");
            return Ok(None);
        }
        if let Some(remaining) = remaining {
            exam.session_mut().set_remaining_seconds(remaining);
        }
        exam.session_mut().mark_submitted()?;
        let payload = exam.submit_payload(reason);
        info!(
            %reason,
            warnings = payload.warning_count,
            remaining = payload.time_remaining_seconds,
            "submitting exam"
        );

        self.teardown().await;
        self.pending_submission = Some(payload);
        self.outcome = Some(SessionOutcome::Submitted {
            reason,
            receipt: None,
        });
        self.deliver_pending().await?;
        Ok(self.outcome.clone())
    }

    /// End the attempt without a final submission.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotStarted` without an attempt.
    pub async fn terminate(
        &mut self,
        reason: SubmissionReason,
    ) -> Result<Option<SessionOutcome>, SessionError> {
        let remaining = self.countdown_remaining();
        let exam = self.exam.as_mut().ok_or(SessionError::NotStarted)?;
        if !exam.session().is_active() {
            debug!(%reason, "session already ended, ignoring terminate");
            return Ok(None);
        }
        if let Some(remaining) = remaining {
            exam.session_mut().set_remaining_seconds(remaining);
        }
        exam.session_mut().mark_terminated()?;
        warn!(%reason, "session terminated");

        self.teardown().await;
        let outcome = SessionOutcome::Terminated { reason };
        self.outcome = Some(outcome.clone());
        Ok(Some(outcome))
    }

    async fn deliver_pending(&mut self) -> Result<SubmissionReceipt, SessionError> {
        let payload = self
            .pending_submission
            .clone()
            .ok_or(SessionError::NothingToRetry)?;
        let meta = self.meta().cloned().ok_or(SessionError::NotStarted)?;

        let delivered = with_timeout(
            self.settings.network_timeout(),
            "submission",
            self.deps.backend.submit(&meta, &payload, self.clock.now()),
        )
        .await;

        match delivered {
            Ok(receipt) => {
                info!(receipt_id = receipt.id, "submission acknowledged");
                self.pending_submission = None;
                if let Some(SessionOutcome::Submitted { receipt: slot, .. }) = self.outcome.as_mut()
                {
                    *slot = Some(receipt.clone());
                }
                Ok(receipt)
            }
            Err(err) => {
                error!(error = %err, "submission failed, answers kept for retry");
                Err(SessionError::SubmissionFailed(Box::new(err)))
            }
        }
    }

    /// Stop every component and drop anything still queued. Safe to repeat.
    async fn teardown(&mut self) {
        if let Some(mut countdown) = self.countdown.take() {
            countdown.stop();
        }
        self.tasks.shutdown();
        self.guard.stop();

        if let Some(mut events) = self.events.take() {
            events.close();
            let mut dropped = 0_u32;
            while events.try_recv().is_ok() {
                dropped += 1;
            }
            debug!(dropped, "discarded queued events");
        }
        if let Some(feed) = self.feed.take() {
            feed.release();
        }

        // Host calls are bounded by the network timeout.
        let limit = self.settings.network_timeout();
        if let Some(meta) = self.meta().cloned() {
            match tokio::time::timeout(limit, self.deps.transport.leave(&meta)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = %err, "leave not delivered"),
                Err(_) => warn!("leave timed out"),
            }
        }
        if tokio::time::timeout(limit, self.deps.transport.disconnect())
            .await
            .is_err()
        {
            warn!("transport disconnect timed out");
        }
        if tokio::time::timeout(limit, self.deps.screen.exit_fullscreen())
            .await
            .is_err()
        {
            warn!("leaving fullscreen timed out");
        }
    }

    fn log_violation(&mut self, event: ViolationEvent) -> u32 {
        match self.exam.as_mut() {
            Some(exam) if exam.session().is_active() => exam.record_violation(event),
            _ => 0,
        }
    }

    fn active_exam(&mut self) -> Result<&mut ExamState, SessionError> {
        match self.exam.as_mut() {
            Some(exam) if exam.session().is_active() => Ok(exam),
            Some(_) => Err(SessionError::NotActive),
            None => Err(SessionError::NotStarted),
        }
    }

    fn countdown_remaining(&self) -> Option<u32> {
        self.countdown.as_ref().map(SessionClock::remaining_seconds)
    }

    //
    // ─── QUERIES ───────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.exam
            .as_ref()
            .map_or(SessionStatus::NotStarted, |exam| exam.session().status())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() == SessionStatus::Active
    }

    #[must_use]
    pub fn meta(&self) -> Option<&SessionMeta> {
        self.exam.as_ref().map(|exam| exam.session().meta())
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> Option<u32> {
        self.countdown_remaining()
            .or_else(|| self.exam.as_ref().map(|exam| exam.session().remaining_seconds()))
    }

    #[must_use]
    pub fn answers(&self) -> Option<&AnswerRecord> {
        self.exam.as_ref().map(ExamState::answers)
    }

    #[must_use]
    pub fn navigation(&self) -> Option<&NavigationState> {
        self.exam.as_ref().map(ExamState::navigation)
    }

    #[must_use]
    pub fn progress(&self) -> Option<ExamProgress> {
        self.exam.as_ref().map(ExamState::progress)
    }

    /// Ordered log of every violation recorded while the session was active.
    #[must_use]
    pub fn violations(&self) -> &[ViolationEvent] {
        self.exam
            .as_ref()
            .map(ExamState::violations)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn warning_count(&self) -> u32 {
        self.exam.as_ref().map_or(0, ExamState::warning_count)
    }

    #[must_use]
    pub fn ai_violation_count(&self) -> u32 {
        self.exam.as_ref().map_or(0, ExamState::ai_high_count)
    }

    #[must_use]
    pub fn tab_switch_count(&self) -> u32 {
        self.guard.switch_count()
    }

    #[must_use]
    pub fn environment_state(&self) -> EnvironmentState {
        self.guard.state()
    }

    #[must_use]
    pub fn needs_fullscreen_prompt(&self) -> bool {
        self.guard.needs_fullscreen_prompt()
    }

    #[must_use]
    pub fn detector_status(&self) -> Option<&DetectorStatus> {
        self.detector_status.as_ref()
    }

    #[must_use]
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    #[must_use]
    pub fn has_pending_submission(&self) -> bool {
        self.pending_submission.is_some()
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }
}

/// Bound a collaborator call by the network timeout.
async fn with_timeout<T, E, F>(
    limit: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, E>>,
    SessionError: From<E>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(SessionError::from),
        Err(_) => {
            warn!(operation, "collaborator call timed out");
            Err(SessionError::TimedOut { operation })
        }
    }
}
