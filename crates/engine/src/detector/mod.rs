//! AI violation detection.
//!
//! Models are acquired once with bounded retries; after that a fixed-interval loop
//! samples the camera, runs face and object inference, and feeds the results to
//! [`ViolationRules`]. A failed acquisition marks detection unavailable but never
//! blocks the exam.

mod capability;
mod rules;

pub use capability::{
    DetectionCapability, FaceDetection, FaceKeypoints, ObjectDetection, Point,
};
pub use rules::{FrameAnalysis, RuleOutcome, ViolationCounterState, ViolationRules};

use std::sync::Arc;

use exam_core::model::ViolationSnapshot;
use exam_core::{Clock, ProctorSettings};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::CameraFeed;
use crate::error::DetectionError;
use crate::event::{EventSender, SessionEvent};
use crate::tasks::{Interrupted, bounded, sleep_or_cancel};

/// Availability of AI detection for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorStatus {
    Loading,
    Ready,
    /// Models could not be acquired; the exam continues without AI detection.
    Unavailable { attempts: u32, error: String },
}

pub struct ViolationDetector {
    settings: ProctorSettings,
    capability: Arc<dyn DetectionCapability>,
    snapshots: watch::Sender<ViolationSnapshot>,
}

impl ViolationDetector {
    #[must_use]
    pub fn new(settings: ProctorSettings, capability: Arc<dyn DetectionCapability>) -> Self {
        let (snapshots, _) = watch::channel(ViolationSnapshot::default());
        Self {
            settings,
            capability,
            snapshots,
        }
    }

    /// Latest per-frame flags, for attaching to streamed frames.
    #[must_use]
    pub fn snapshots(&self) -> watch::Receiver<ViolationSnapshot> {
        self.snapshots.subscribe()
    }

    /// Load the models, then run detection ticks until `token` is cancelled.
    pub(crate) async fn run(
        self,
        feed: Arc<dyn CameraFeed>,
        clock: Clock,
        events: EventSender,
        token: CancellationToken,
    ) {
        let _ = events.send(SessionEvent::Detector(DetectorStatus::Loading));
        match self.load_models(&token).await {
            Ok(attempts) => {
                info!(attempts, "detection models ready");
                let _ = events.send(SessionEvent::Detector(DetectorStatus::Ready));
            }
            Err(ModelLoadFailure::Cancelled) => return,
            Err(ModelLoadFailure::Exhausted { attempts, error }) => {
                warn!(attempts, %error, "detection unavailable, continuing without it");
                let _ = events.send(SessionEvent::Detector(DetectorStatus::Unavailable {
                    attempts,
                    error,
                }));
                return;
            }
        }

        self.detect_loop(feed.as_ref(), clock, &events, &token).await;
    }

    async fn load_models(&self, token: &CancellationToken) -> Result<u32, ModelLoadFailure> {
        let retries = self.settings.model_load_retries();
        let mut last_error = String::new();

        for attempt in 0..=retries {
            let loaded = bounded(self.settings.network_timeout(), token, async {
                self.capability.load_face_model().await?;
                self.capability.load_object_model().await
            })
            .await;

            match loaded {
                Ok(Ok(())) => return Ok(attempt + 1),
                Ok(Err(err)) => last_error = err.to_string(),
                Err(Interrupted::TimedOut) => last_error = "model load timed out".to_owned(),
                Err(Interrupted::Cancelled) => return Err(ModelLoadFailure::Cancelled),
            }
            warn!(attempt = attempt + 1, error = %last_error, "model load failed");

            if attempt < retries
                && !sleep_or_cancel(self.settings.model_backoff(attempt), token).await
            {
                return Err(ModelLoadFailure::Cancelled);
            }
        }

        Err(ModelLoadFailure::Exhausted {
            attempts: retries + 1,
            error: last_error,
        })
    }

    async fn detect_loop(
        &self,
        feed: &dyn CameraFeed,
        clock: Clock,
        events: &EventSender,
        token: &CancellationToken,
    ) {
        let interval = self.settings.detection_interval();
        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rules = ViolationRules::new(&self.settings);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !feed.is_ready() {
                debug!("camera not ready, skipping detection tick");
                continue;
            }

            let now_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            // Awaited inline: a slow pass delays the next tick instead of overlapping it.
            let analysis = tokio::select! {
                biased;
                () = token.cancelled() => break,
                analysis = self.analyze(feed, clock) => analysis,
            };
            let analysis = match analysis {
                Ok(analysis) => analysis,
                Err(err) => {
                    warn!(error = %err, "detection tick failed, skipping");
                    continue;
                }
            };

            let outcome = rules.evaluate(now_ms, clock.now(), &analysis);
            self.snapshots.send_replace(outcome.snapshot);
            for event in outcome.events {
                info!(
                    category = %event.category(),
                    severity = ?event.severity(),
                    "violation detected"
                );
                if events.send(SessionEvent::Violation(event)).is_err() {
                    return;
                }
            }
        }

        rules.reset();
        debug!("detection loop stopped");
    }

    async fn analyze(
        &self,
        feed: &dyn CameraFeed,
        clock: Clock,
    ) -> Result<FrameAnalysis, DetectionError> {
        let frame = feed
            .capture()
            .await
            .map_err(|err| DetectionError::Inference(err.to_string()))?;
        let timestamp_ms = clock.epoch_ms();
        let faces = self.capability.detect_faces(&frame, timestamp_ms).await?;
        let objects = self.capability.detect_objects(&frame, timestamp_ms).await?;
        Ok(FrameAnalysis { faces, objects })
    }
}

enum ModelLoadFailure {
    Cancelled,
    Exhausted { attempts: u32, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackCamera, ScriptedDetection};
    use exam_core::model::ViolationCategory;
    use exam_core::time::fixed_clock;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn two_faces() -> FrameAnalysis {
        FrameAnalysis {
            faces: vec![
                FaceDetection {
                    score: 0.9,
                    keypoints: None,
                };
                2
            ],
            objects: Vec::new(),
        }
    }

    fn spawn_detector(
        detection: Arc<ScriptedDetection>,
    ) -> (
        mpsc::UnboundedReceiver<SessionEvent>,
        watch::Receiver<ViolationSnapshot>,
        CancellationToken,
    ) {
        spawn_detector_on(detection, LoopbackCamera::new())
    }

    fn spawn_detector_on(
        detection: Arc<ScriptedDetection>,
        camera: LoopbackCamera,
    ) -> (
        mpsc::UnboundedReceiver<SessionEvent>,
        watch::Receiver<ViolationSnapshot>,
        CancellationToken,
    ) {
        let detector = ViolationDetector::new(ProctorSettings::default(), detection);
        let snapshots = detector.snapshots();
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let feed: Arc<dyn CameraFeed> = Arc::new(camera);
        tokio::spawn(detector.run(feed, fixed_clock(), tx, token.clone()));
        (rx, snapshots, token)
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_unavailable() {
        let detection = Arc::new(ScriptedDetection::new());
        detection.fail_next_loads(u32::MAX);
        let (mut rx, _, _token) = spawn_detector(Arc::clone(&detection));

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Detector(DetectorStatus::Loading))
        );
        let started = Instant::now();
        match rx.recv().await {
            Some(SessionEvent::Detector(DetectorStatus::Unavailable { attempts, .. })) => {
                assert_eq!(attempts, 4);
            }
            other => panic!("expected unavailable, got {other:?}"),
        }
        // Backoff 1s + 2s + 4s between the four attempts.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(7) && waited < Duration::from_secs(8));
        assert_eq!(detection.load_attempts(), 4);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_load_failures() {
        let detection = Arc::new(ScriptedDetection::new());
        detection.fail_next_loads(2);
        let (mut rx, _, _token) = spawn_detector(Arc::clone(&detection));

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Detector(DetectorStatus::Loading))
        );
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Detector(DetectorStatus::Ready))
        );
        assert_eq!(detection.load_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_ticks_are_skipped_and_later_ticks_still_run() {
        let detection = Arc::new(ScriptedDetection::new());
        detection.fail_next_inferences(2);
        detection.set_analysis(two_faces());
        let (mut rx, snapshots, token) = spawn_detector(Arc::clone(&detection));

        let started = Instant::now();
        loop {
            match rx.recv().await {
                Some(SessionEvent::Violation(event)) => {
                    assert_eq!(event.category(), ViolationCategory::MultipleFaces);
                    break;
                }
                Some(_) => {}
                None => panic!("detector stopped"),
            }
        }
        // Ticks at 2s and 4s fail; the 6s tick succeeds.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(6) && waited < Duration::from_secs(7));
        assert!(snapshots.borrow().multiple_faces);

        token.cancel();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_are_skipped_until_the_camera_is_ready() {
        let detection = Arc::new(ScriptedDetection::new());
        // Consumed by the first tick that actually runs inference.
        detection.push_analysis(two_faces());
        let camera = LoopbackCamera::new();
        camera.set_ready(false);
        let (mut rx, snapshots, token) =
            spawn_detector_on(Arc::clone(&detection), camera.clone());

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Detector(DetectorStatus::Loading))
        );
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Detector(DetectorStatus::Ready))
        );

        // Ticks at 2s, 4s and 6s find no frame source.
        tokio::time::sleep(Duration::from_millis(6_500)).await;
        assert!(rx.try_recv().is_err());
        assert!(!snapshots.borrow().multiple_faces);

        camera.set_ready(true);
        let resumed = Instant::now();
        match rx.recv().await {
            Some(SessionEvent::Violation(event)) => {
                assert_eq!(event.category(), ViolationCategory::MultipleFaces);
            }
            other => panic!("expected a violation, got {other:?}"),
        }
        assert!(resumed.elapsed() < Duration::from_secs(2));

        token.cancel();
        assert_eq!(rx.recv().await, None);
    }
}
