//! Stand-ins for a real candidate and real vision models, so a session can be
//! exercised end to end from a terminal.

use async_trait::async_trait;
use engine::camera::Frame;
use engine::detector::{
    DetectionCapability, FaceDetection, FaceKeypoints, ObjectDetection, Point,
};
use engine::{DetectionError, SessionController, SessionError, SessionOutcome};
use rand::Rng;
use tracing::info;

/// Per-frame odds of each anomaly.
#[derive(Debug, Clone, Copy)]
pub struct Anomalies {
    pub absent: f64,
    pub extra_face: f64,
    pub looking_down: f64,
    pub phone: f64,
}

impl Default for Anomalies {
    fn default() -> Self {
        Self {
            absent: 0.05,
            extra_face: 0.03,
            looking_down: 0.05,
            phone: 0.02,
        }
    }
}

/// Detection that invents plausible results instead of running models.
#[derive(Debug, Default)]
pub struct RandomDetection {
    odds: Anomalies,
}

impl RandomDetection {
    #[must_use]
    pub fn new(odds: Anomalies) -> Self {
        Self { odds }
    }
}

fn face(looking_down: bool) -> FaceDetection {
    let nose_y = if looking_down { 0.5 } else { 0.43 };
    FaceDetection {
        score: 0.93,
        keypoints: Some(FaceKeypoints {
            right_eye: Point::new(0.42, 0.4),
            left_eye: Point::new(0.58, 0.4),
            nose_tip: Point::new(0.5, nose_y),
        }),
    }
}

#[async_trait]
impl DetectionCapability for RandomDetection {
    async fn load_face_model(&self) -> Result<(), DetectionError> {
        Ok(())
    }

    async fn load_object_model(&self) -> Result<(), DetectionError> {
        Ok(())
    }

    async fn detect_faces(
        &self,
        _frame: &Frame,
        _timestamp_ms: i64,
    ) -> Result<Vec<FaceDetection>, DetectionError> {
        let mut rng = rand::rng();
        if rng.random_bool(self.odds.absent) {
            return Ok(Vec::new());
        }
        let mut faces = vec![face(rng.random_bool(self.odds.looking_down))];
        if rng.random_bool(self.odds.extra_face) {
            faces.push(face(false));
        }
        Ok(faces)
    }

    async fn detect_objects(
        &self,
        _frame: &Frame,
        _timestamp_ms: i64,
    ) -> Result<Vec<ObjectDetection>, DetectionError> {
        let mut rng = rand::rng();
        let mut objects = vec![ObjectDetection {
            label: "book".into(),
            confidence: rng.random_range(0.3..0.9),
        }];
        if rng.random_bool(self.odds.phone) {
            objects.push(ObjectDetection {
                label: "cell phone".into(),
                confidence: rng.random_range(0.55..0.95),
            });
        }
        Ok(objects)
    }
}

enum Action {
    Answer { question: u32, option: u32 },
    Review(u32),
    Save,
    SwitchTab,
    LeaveFullscreen,
    Finish,
}

/// A candidate who answers at random and now and then misbehaves.
pub struct Candidate {
    question_count: u32,
    options: u32,
    tab_switch_odds: f64,
}

impl Candidate {
    #[must_use]
    pub fn new(question_count: u32, tab_switch_odds: f64) -> Self {
        Self {
            question_count,
            options: 4,
            tab_switch_odds,
        }
    }

    fn pick(&self, unanswered: u32) -> Action {
        let mut rng = rand::rng();
        if unanswered == 0 {
            return Action::Finish;
        }
        if rng.random_bool(self.tab_switch_odds) {
            return Action::SwitchTab;
        }
        match rng.random_range(0..20) {
            0 => Action::LeaveFullscreen,
            1 => Action::Save,
            2 | 3 => Action::Review(rng.random_range(0..self.question_count)),
            _ => Action::Answer {
                question: rng.random_range(0..self.question_count),
                option: rng.random_range(0..self.options),
            },
        }
    }

    /// Perform one action. Returns the outcome if it ended the session.
    ///
    /// # Errors
    ///
    /// Returns whatever `SessionError` the controller rejects the action with.
    pub async fn act(
        &self,
        controller: &mut SessionController,
    ) -> Result<Option<SessionOutcome>, SessionError> {
        let unanswered = controller.progress().map_or(0, |progress| progress.unanswered);
        match self.pick(unanswered) {
            Action::Answer { question, option } => {
                controller.go_to(question)?;
                controller.select_answer(question, option)?;
            }
            Action::Review(question) => {
                controller.toggle_review(question)?;
            }
            Action::Save => {
                let snapshot = controller.save_progress().await?;
                info!(remaining = snapshot.remaining_seconds, "candidate saved progress");
            }
            Action::SwitchTab => {
                info!("candidate switched away");
                if let Some(outcome) = controller.on_visibility_change(false).await? {
                    return Ok(Some(outcome));
                }
                controller.on_visibility_change(true).await?;
            }
            Action::LeaveFullscreen => {
                if controller.on_fullscreen_change(false) {
                    controller.request_fullscreen().await?;
                }
            }
            Action::Finish => return controller.finish().await.map(Some),
        }
        Ok(None)
    }
}
