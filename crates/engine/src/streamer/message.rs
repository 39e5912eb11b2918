use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use exam_core::model::{SessionId, SessionMeta, StudentId, TestId, ViolationSnapshot};
use serde::{Serialize, Serializer};

/// One streamed camera frame plus the detector's latest flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMessage {
    pub student_id: StudentId,
    pub student_name: String,
    pub test_id: TestId,
    pub test_title: String,
    #[serde(serialize_with = "as_base64")]
    pub frame: Bytes,
    /// Capture time, epoch milliseconds.
    pub timestamp: i64,
    pub violation_snapshot: ViolationSnapshot,
}

impl FrameMessage {
    #[must_use]
    pub fn new(
        meta: &SessionMeta,
        frame: Bytes,
        timestamp: i64,
        violation_snapshot: ViolationSnapshot,
    ) -> Self {
        Self {
            student_id: meta.student_id.clone(),
            student_name: meta.student_name.clone(),
            test_id: meta.test_id.clone(),
            test_title: meta.test_title.clone(),
            frame,
            timestamp,
            violation_snapshot,
        }
    }
}

fn as_base64<S: Serializer>(frame: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(frame))
}

/// Server-initiated health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPing {
    pub id: u64,
    pub sent_at_ms: i64,
}

/// How alive the candidate's stream looks from this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Healthy,
    /// Connected, but recent frames failed to send.
    Degraded,
    CameraInactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthPong {
    pub ping_id: u64,
    pub session_id: SessionId,
    pub liveness: Liveness,
    pub camera_active: bool,
    pub frames_sent: u64,
    pub responded_at_ms: i64,
}
