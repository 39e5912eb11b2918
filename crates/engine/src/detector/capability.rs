use async_trait::async_trait;

use crate::camera::Frame;
use crate::error::DetectionError;

/// A point in normalized image coordinates (`0.0..=1.0`, origin top-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceKeypoints {
    pub right_eye: Point,
    pub left_eye: Point,
    pub nose_tip: Point,
}

impl FaceKeypoints {
    /// How far the nose sits below the eye line; positive means the head is tilted down.
    #[must_use]
    pub fn nose_drop(&self) -> f32 {
        let eye_y = (self.left_eye.y + self.right_eye.y) / 2.0;
        self.nose_tip.y - eye_y
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub score: f32,
    pub keypoints: Option<FaceKeypoints>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetection {
    pub label: String,
    pub confidence: f32,
}

/// Face and object inference, backed by whatever models the host provides.
#[async_trait]
pub trait DetectionCapability: Send + Sync {
    /// # Errors
    ///
    /// Returns `DetectionError::ModelLoad` if the face model cannot be acquired.
    async fn load_face_model(&self) -> Result<(), DetectionError>;

    /// # Errors
    ///
    /// Returns `DetectionError::ModelLoad` if the object model cannot be acquired.
    async fn load_object_model(&self) -> Result<(), DetectionError>;

    /// # Errors
    ///
    /// Returns `DetectionError::Inference` on a failed pass.
    async fn detect_faces(
        &self,
        frame: &Frame,
        timestamp_ms: i64,
    ) -> Result<Vec<FaceDetection>, DetectionError>;

    /// # Errors
    ///
    /// Returns `DetectionError::Inference` on a failed pass.
    async fn detect_objects(
        &self,
        frame: &Frame,
        timestamp_ms: i64,
    ) -> Result<Vec<ObjectDetection>, DetectionError>;
}
