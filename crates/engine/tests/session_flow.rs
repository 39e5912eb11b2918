use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine::detector::{FaceDetection, FrameAnalysis};
use engine::loopback::{LoopbackCamera, LoopbackScreen, LoopbackTransport, ScriptedDetection};
use engine::streamer::{FrameMessage, HealthPong, TransportEvent};
use engine::{
    BackendError, CameraError, ConnectionPhase, DetectorStatus, EnvironmentState, ExamBackend,
    ScreenControl, ScreenError, SessionController, SessionDeps, SessionError, SessionOutcome,
    StorageBackend, Transport, TransportError,
};
use exam_core::ProctorSettings;
use exam_core::model::{
    ExamSessionDraft, ProgressSnapshot, SaveProgressPayload, SessionMeta, SessionStatus,
    StudentId, SubmissionReason, SubmissionReceipt, SubmitPayload, TestId, ViolationCategory,
};
use exam_core::time::fixed_clock;
use storage::repository::StorageError;
use tokio::sync::mpsc;
use tokio::time::Instant;

struct Rig {
    controller: SessionController,
    detection: Arc<ScriptedDetection>,
    transport: Arc<LoopbackTransport>,
    camera: Arc<LoopbackCamera>,
    screen: Arc<LoopbackScreen>,
    backend: StorageBackend,
}

fn rig_with(backend: StorageBackend, exam_backend: Arc<dyn ExamBackend>, screen: LoopbackScreen) -> Rig {
    let detection = Arc::new(ScriptedDetection::new());
    let transport = Arc::new(LoopbackTransport::new());
    let camera = Arc::new(LoopbackCamera::new());
    let screen = Arc::new(screen);
    let deps = SessionDeps {
        detection: detection.clone(),
        transport: transport.clone(),
        camera: camera.clone(),
        screen: screen.clone(),
        backend: exam_backend,
    };
    Rig {
        controller: SessionController::new(ProctorSettings::default(), fixed_clock(), deps),
        detection,
        transport,
        camera,
        screen,
        backend,
    }
}

fn rig() -> Rig {
    let backend = StorageBackend::in_memory();
    rig_with(backend.clone(), Arc::new(backend), LoopbackScreen::new())
}

fn draft(total_duration_seconds: u32) -> ExamSessionDraft {
    ExamSessionDraft {
        student_id: StudentId::new("student-1").unwrap(),
        student_name: "Ada Lovelace".into(),
        test_id: TestId::new("algebra-1").unwrap(),
        test_title: "Algebra I".into(),
        question_count: 10,
        total_duration_seconds,
        remaining_seconds: None,
    }
}

/// Feed background events to the controller until `done` holds.
async fn drive_until(controller: &mut SessionController, done: impl Fn(&SessionController) -> bool) {
    while !done(controller) {
        let event = controller
            .next_event()
            .await
            .expect("session ended before condition held");
        controller.handle_event(event).await.expect("event handled");
    }
}

#[tokio::test(start_paused = true)]
async fn clock_expiry_submits_exactly_once() {
    let mut rig = rig();
    rig.controller.start(draft(2)).await.unwrap();

    let outcome = rig.controller.run_until_finished().await.unwrap();
    let SessionOutcome::Submitted { reason, receipt } = outcome else {
        panic!("expected submission, got {outcome:?}");
    };
    assert_eq!(reason, SubmissionReason::TimeUp);
    assert_eq!(rig.controller.status(), SessionStatus::Submitted);
    assert_eq!(rig.controller.remaining_seconds(), Some(0));

    let receipt = receipt.expect("acknowledged");
    let stored = rig
        .backend
        .storage()
        .submissions
        .get_submission(receipt.id)
        .await
        .unwrap();
    assert_eq!(stored.payload.submission_reason, SubmissionReason::TimeUp);
    assert!(matches!(
        rig.backend.storage().submissions.get_submission(receipt.id + 1).await,
        Err(StorageError::NotFound)
    ));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(rig.controller.next_event().await, None);
    assert_eq!(rig.transport.leaves(), 1);
    assert!(rig.camera.is_released());
}

#[tokio::test(start_paused = true)]
async fn five_high_ai_violations_force_submission() {
    let mut rig = rig();
    rig.detection.set_analysis(FrameAnalysis {
        faces: vec![
            FaceDetection {
                score: 0.9,
                keypoints: None,
            };
            2
        ],
        objects: Vec::new(),
    });
    rig.controller.start(draft(600)).await.unwrap();

    let outcome = rig.controller.run_until_finished().await.unwrap();
    assert_eq!(outcome.reason(), SubmissionReason::AiViolationLimit);
    assert_eq!(rig.controller.ai_violation_count(), 5);
    assert_eq!(rig.controller.tab_switch_count(), 0);
    assert!(rig
        .controller
        .violations()
        .iter()
        .all(|event| event.category() == ViolationCategory::MultipleFaces));
    assert_eq!(rig.controller.warning_count(), 5);
    assert!(rig.controller.remaining_seconds().unwrap() > 500);
}

#[tokio::test(start_paused = true)]
async fn camera_loss_terminates_and_silences_everything() {
    let mut rig = rig();
    rig.controller.start(draft(600)).await.unwrap();
    rig.controller.select_answer(0, 1).unwrap();
    rig.camera.end_track();

    let outcome = rig.controller.run_until_finished().await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Terminated {
            reason: SubmissionReason::CameraLost
        }
    );
    assert_eq!(rig.controller.status(), SessionStatus::Terminated);
    assert_eq!(
        rig.controller.violations().last().map(|event| event.category()),
        Some(ViolationCategory::CameraLost)
    );
    assert!(!rig.controller.has_pending_submission());
    assert!(matches!(
        rig.backend.storage().submissions.get_submission(1).await,
        Err(StorageError::NotFound)
    ));

    let frames = rig.transport.frame_count();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.controller.next_event().await, None);
    assert_eq!(rig.transport.frame_count(), frames);
    assert!(matches!(
        rig.controller.select_answer(1, 1),
        Err(SessionError::NotActive)
    ));
}

#[tokio::test(start_paused = true)]
async fn disabled_or_missing_video_track_counts_as_camera_loss() {
    let cases: [(fn(&LoopbackCamera), &str); 2] = [
        (LoopbackCamera::disable_track, "video track disabled"),
        (LoopbackCamera::remove_tracks, "no video track"),
    ];
    for (lose_camera, reason) in cases {
        let mut rig = rig();
        rig.controller.start(draft(600)).await.unwrap();
        lose_camera(rig.camera.as_ref());

        let outcome = rig.controller.run_until_finished().await.unwrap();
        assert_eq!(
            outcome,
            SessionOutcome::Terminated {
                reason: SubmissionReason::CameraLost
            }
        );
        let lost = rig.controller.violations().last().cloned().unwrap();
        assert_eq!(lost.category(), ViolationCategory::CameraLost);
        assert!(lost.message().ends_with(reason), "{}", lost.message());
        assert!(rig.camera.is_released());
    }
}

#[tokio::test(start_paused = true)]
async fn tab_switch_threshold_submits_once() {
    let mut rig = rig();
    // Switches before start belong to the permission flow and are not counted.
    assert_eq!(rig.controller.on_visibility_change(false).await.unwrap(), None);
    assert_eq!(rig.controller.on_visibility_change(true).await.unwrap(), None);

    rig.controller.start(draft(600)).await.unwrap();
    assert_eq!(rig.controller.tab_switch_count(), 0);

    for _ in 0..2 {
        assert_eq!(rig.controller.on_visibility_change(false).await.unwrap(), None);
        assert_eq!(rig.controller.environment_state(), EnvironmentState::Hidden);
        assert_eq!(rig.controller.on_visibility_change(true).await.unwrap(), None);
    }
    assert_eq!(rig.controller.warning_count(), 2);

    let outcome = rig.controller.on_visibility_change(false).await.unwrap();
    assert_eq!(
        outcome.map(|outcome| outcome.reason()),
        Some(SubmissionReason::TabSwitchViolation)
    );

    rig.controller.on_visibility_change(true).await.unwrap();
    assert_eq!(rig.controller.on_visibility_change(false).await.unwrap(), None);
    assert_eq!(rig.controller.tab_switch_count(), 3);
    assert_eq!(rig.controller.warning_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn saved_progress_resumes_identically() {
    let backend = StorageBackend::in_memory();
    let mut first = rig_with(backend.clone(), Arc::new(backend.clone()), LoopbackScreen::new());
    first.controller.start(draft(600)).await.unwrap();
    first.controller.select_answer(0, 2).unwrap();
    first.controller.select_answer(4, 1).unwrap();
    first.controller.go_to(4).unwrap();
    assert!(first.controller.next_question().unwrap());
    first.controller.toggle_review(2).unwrap();

    tokio::time::sleep(Duration::from_millis(12_500)).await;
    let snapshot = first.controller.save_progress().await.unwrap();
    assert!((587..=588).contains(&snapshot.remaining_seconds));
    let answers = first.controller.answers().cloned().unwrap();
    let navigation = first.controller.navigation().cloned().unwrap();
    first.controller.stop().await;
    assert_eq!(first.controller.status(), SessionStatus::NotStarted);

    let mut second = rig_with(backend.clone(), Arc::new(backend), LoopbackScreen::new());
    let saved = second
        .controller
        .load_saved_progress(&snapshot.student_id, &snapshot.test_id)
        .await
        .unwrap()
        .expect("progress saved");
    second.controller.resume(draft(600), &saved).await.unwrap();

    assert_eq!(second.controller.answers(), Some(&answers));
    assert_eq!(second.controller.navigation(), Some(&navigation));
    let remaining = second.controller.remaining_seconds().unwrap();
    assert!(remaining.abs_diff(snapshot.remaining_seconds) <= 1);
    assert_eq!(second.controller.progress().unwrap().answered, 2);
}

#[tokio::test(start_paused = true)]
async fn resume_rejects_progress_from_another_test() {
    let mut rig = rig();
    let saved = SaveProgressPayload {
        test_id: TestId::new("geometry-2").unwrap(),
        answers: Default::default(),
        current_question: 0,
        marked_for_review: Vec::new(),
        visited_questions: vec![0],
        time_remaining_seconds: 100,
        warning_count: 0,
    };
    assert!(matches!(
        rig.controller.resume(draft(600), &saved).await,
        Err(SessionError::ProgressMismatch { .. })
    ));
    assert_eq!(rig.controller.status(), SessionStatus::NotStarted);
}

/// Fails the first `failures` submissions, then delegates.
struct FlakyBackend {
    inner: StorageBackend,
    failures: AtomicU32,
}

#[async_trait]
impl ExamBackend for FlakyBackend {
    async fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<(), BackendError> {
        self.inner.save_progress(snapshot).await
    }

    async fn load_progress(
        &self,
        student_id: &StudentId,
        test_id: &TestId,
    ) -> Result<Option<SaveProgressPayload>, BackendError> {
        self.inner.load_progress(student_id, test_id).await
    }

    async fn submit(
        &self,
        meta: &SessionMeta,
        payload: &SubmitPayload,
        submitted_at: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, BackendError> {
        if self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::HttpStatus(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            ));
        }
        self.inner.submit(meta, payload, submitted_at).await
    }
}

#[tokio::test(start_paused = true)]
async fn failed_submission_is_kept_for_retry() {
    let backend = StorageBackend::in_memory();
    let flaky = Arc::new(FlakyBackend {
        inner: backend.clone(),
        failures: AtomicU32::new(1),
    });
    let mut rig = rig_with(backend, flaky, LoopbackScreen::new());
    rig.controller.start(draft(600)).await.unwrap();
    rig.controller.select_answer(3, 2).unwrap();

    let err = rig.controller.finish().await.unwrap_err();
    assert!(matches!(err, SessionError::SubmissionFailed(_)));
    assert_eq!(rig.controller.status(), SessionStatus::Submitted);
    assert!(rig.controller.has_pending_submission());
    assert_eq!(
        rig.controller.outcome(),
        Some(&SessionOutcome::Submitted {
            reason: SubmissionReason::Manual,
            receipt: None
        })
    );
    assert!(matches!(
        rig.controller.start(draft(600)).await,
        Err(SessionError::SubmissionPending)
    ));

    let receipt = rig.controller.retry_submission().await.unwrap();
    assert!(!rig.controller.has_pending_submission());
    let stored = rig
        .backend
        .storage()
        .submissions
        .get_submission(receipt.id)
        .await
        .unwrap();
    assert_eq!(stored.payload.answers.get(3), Some(2));
    assert!(matches!(
        rig.controller.retry_submission().await,
        Err(SessionError::NothingToRetry)
    ));
}

#[tokio::test(start_paused = true)]
async fn finish_is_idempotent() {
    let mut rig = rig();
    rig.controller.start(draft(600)).await.unwrap();
    assert!(rig.screen.is_fullscreen());
    let first = rig.controller.finish().await.unwrap();
    let second = rig.controller.finish().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.reason(), SubmissionReason::Manual);
    assert_eq!(rig.transport.leaves(), 1);
    assert!(!rig.screen.is_fullscreen());
}

#[tokio::test(start_paused = true)]
async fn camera_permission_denied_blocks_start() {
    let mut rig = rig();
    rig.camera.deny_permission();
    let err = rig.controller.start(draft(600)).await.unwrap_err();
    assert!(matches!(err, SessionError::Camera(CameraError::PermissionDenied)));
    assert_eq!(rig.controller.status(), SessionStatus::NotStarted);
    assert_eq!(rig.transport.connect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn refused_fullscreen_does_not_block_start() {
    let backend = StorageBackend::in_memory();
    let mut rig = rig_with(backend.clone(), Arc::new(backend), LoopbackScreen::denying());
    rig.controller.start(draft(600)).await.unwrap();
    assert!(rig.controller.is_active());
    assert!(rig.controller.needs_fullscreen_prompt());
    assert_eq!(rig.controller.environment_state(), EnvironmentState::Exited);
    assert!(matches!(
        rig.controller.request_fullscreen().await,
        Err(SessionError::Screen(ScreenError::Denied))
    ));
    assert_eq!(rig.screen.requests(), 2);
    assert!(!rig.screen.is_fullscreen());
    assert!(matches!(
        rig.controller.start(draft(600)).await,
        Err(SessionError::AlreadyActive)
    ));
}

#[tokio::test(start_paused = true)]
async fn unavailable_detection_is_not_fatal() {
    let mut rig = rig();
    rig.detection.fail_next_loads(u32::MAX);
    rig.controller.start(draft(600)).await.unwrap();

    drive_until(&mut rig.controller, |controller| {
        matches!(
            controller.detector_status(),
            Some(DetectorStatus::Unavailable { .. })
        )
    })
    .await;
    assert!(rig.controller.is_active());

    let outcome = rig.controller.finish().await.unwrap();
    assert_eq!(outcome.reason(), SubmissionReason::Manual);
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnects_leave_the_exam_running() {
    let mut rig = rig();
    rig.transport.refuse_connections(true);
    rig.controller.start(draft(600)).await.unwrap();

    drive_until(&mut rig.controller, |controller| {
        controller.connection().phase == ConnectionPhase::Failed
    })
    .await;
    assert!(rig.controller.is_active());
    assert_eq!(rig.transport.connect_attempts(), 11);
    assert!(rig.controller.remaining_seconds().unwrap() < 600);
}

/// Delegates to a loopback link, except that hanging up never completes.
struct HangingTransport(LoopbackTransport);

#[async_trait]
impl Transport for HangingTransport {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        self.0.connect().await
    }

    async fn disconnect(&self) {
        std::future::pending::<()>().await;
    }

    async fn join(&self, meta: &SessionMeta) -> Result<(), TransportError> {
        self.0.join(meta).await
    }

    async fn leave(&self, meta: &SessionMeta) -> Result<(), TransportError> {
        self.0.leave(meta).await
    }

    async fn send_frame(&self, message: &FrameMessage) -> Result<(), TransportError> {
        self.0.send_frame(message).await
    }

    async fn send_pong(&self, pong: &HealthPong) -> Result<(), TransportError> {
        self.0.send_pong(pong).await
    }
}

/// A host whose fullscreen exit never returns.
struct StuckScreen;

#[async_trait]
impl ScreenControl for StuckScreen {
    async fn request_fullscreen(&self) -> Result<(), ScreenError> {
        Ok(())
    }

    async fn exit_fullscreen(&self) {
        std::future::pending::<()>().await;
    }
}

#[tokio::test(start_paused = true)]
async fn hung_host_calls_do_not_block_submission() {
    let backend = StorageBackend::in_memory();
    let deps = SessionDeps {
        detection: Arc::new(ScriptedDetection::new()),
        transport: Arc::new(HangingTransport(LoopbackTransport::new())),
        camera: Arc::new(LoopbackCamera::new()),
        screen: Arc::new(StuckScreen),
        backend: Arc::new(backend.clone()),
    };
    let settings = ProctorSettings::default();
    let limit = settings.network_timeout();
    let mut controller = SessionController::new(settings, fixed_clock(), deps);
    controller.start(draft(600)).await.unwrap();

    let began = Instant::now();
    let outcome = controller.finish().await.unwrap();
    let took = began.elapsed();

    let SessionOutcome::Submitted { reason, receipt } = outcome else {
        panic!("expected submission, got {outcome:?}");
    };
    assert_eq!(reason, SubmissionReason::Manual);
    let receipt = receipt.expect("acknowledged");
    assert!(backend.storage().submissions.get_submission(receipt.id).await.is_ok());
    // Disconnect and fullscreen exit each give up after one network timeout.
    assert!(took >= limit * 2 && took < limit * 3, "{took:?}");
}
