use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ─── CATEGORY & SEVERITY ───────────────────────────────────────────────────────
//

/// What kind of integrity problem was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    MultipleFaces,
    NoFace,
    ProhibitedObject,
    GazeDown,
    TabSwitch,
    CameraLost,
}

impl ViolationCategory {
    /// Categories raised by the AI detector (as opposed to the environment guard or
    /// the camera poll).
    #[must_use]
    pub fn is_ai_detected(self) -> bool {
        matches!(
            self,
            Self::MultipleFaces | Self::NoFace | Self::ProhibitedObject | Self::GazeDown
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MultipleFaces => "multiple_faces",
            Self::NoFace => "no_face",
            Self::ProhibitedObject => "prohibited_object",
            Self::GazeDown => "gaze_down",
            Self::TabSwitch => "tab_switch",
            Self::CameraLost => "camera_lost",
        }
    }
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal seriousness of a violation. `High` drives escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

//
// ─── EVENT ─────────────────────────────────────────────────────────────────────
//

/// Optional measurements attached to a violation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One observed integrity violation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    #[serde(rename = "type")]
    category: ViolationCategory,
    severity: Severity,
    message: String,
    observed_at: DateTime<Utc>,
    #[serde(flatten)]
    detail: ViolationDetail,
}

impl ViolationEvent {
    fn new(
        category: ViolationCategory,
        severity: Severity,
        message: String,
        observed_at: DateTime<Utc>,
        detail: ViolationDetail,
    ) -> Self {
        Self {
            category,
            severity,
            message,
            observed_at,
            detail,
        }
    }

    #[must_use]
    pub fn multiple_faces(face_count: u32, observed_at: DateTime<Utc>) -> Self {
        Self::new(
            ViolationCategory::MultipleFaces,
            Severity::High,
            format!("Multiple faces detected ({face_count})"),
            observed_at,
            ViolationDetail {
                count: Some(face_count),
                ..ViolationDetail::default()
            },
        )
    }

    #[must_use]
    pub fn no_face(duration_ms: u64, observed_at: DateTime<Utc>) -> Self {
        Self::new(
            ViolationCategory::NoFace,
            Severity::High,
            format!("No face visible for {:.1}s", duration_ms as f64 / 1000.0),
            observed_at,
            ViolationDetail {
                duration_ms: Some(duration_ms),
                ..ViolationDetail::default()
            },
        )
    }

    #[must_use]
    pub fn prohibited_object(
        label: impl Into<String>,
        confidence: f32,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let label = label.into();
        Self::new(
            ViolationCategory::ProhibitedObject,
            Severity::High,
            format!("Prohibited object detected: {label}"),
            observed_at,
            ViolationDetail {
                confidence: Some(confidence),
                label: Some(label),
                ..ViolationDetail::default()
            },
        )
    }

    #[must_use]
    pub fn gaze_down(observed_at: DateTime<Utc>) -> Self {
        Self::new(
            ViolationCategory::GazeDown,
            Severity::Medium,
            "Looking down away from the screen".to_owned(),
            observed_at,
            ViolationDetail::default(),
        )
    }

    /// A tab/window switch. Reaching `threshold` makes it terminal (High).
    #[must_use]
    pub fn tab_switch(switch_count: u32, threshold: u32, observed_at: DateTime<Utc>) -> Self {
        let (severity, message) = if switch_count >= threshold {
            (
                Severity::High,
                format!("Tab switch limit reached ({switch_count}/{threshold})"),
            )
        } else {
            (
                Severity::Medium,
                format!("Tab switch detected ({switch_count}/{threshold})"),
            )
        };
        Self::new(
            ViolationCategory::TabSwitch,
            severity,
            message,
            observed_at,
            ViolationDetail {
                count: Some(switch_count),
                ..ViolationDetail::default()
            },
        )
    }

    #[must_use]
    pub fn camera_lost(reason: &str, observed_at: DateTime<Utc>) -> Self {
        Self::new(
            ViolationCategory::CameraLost,
            Severity::High,
            format!("Camera feed lost: {reason}"),
            observed_at,
            ViolationDetail::default(),
        )
    }

    #[must_use]
    pub fn category(&self) -> ViolationCategory {
        self.category
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    #[must_use]
    pub fn detail(&self) -> &ViolationDetail {
        &self.detail
    }

    /// High-severity detections from the AI detector count toward the forced-submit limit.
    #[must_use]
    pub fn counts_toward_ai_limit(&self) -> bool {
        self.category.is_ai_detected() && self.severity == Severity::High
    }
}

//
// ─── SNAPSHOT ──────────────────────────────────────────────────────────────────
//

/// Latest per-frame detection flags, attached to every streamed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationSnapshot {
    pub multiple_faces: bool,
    pub no_face: bool,
    pub phone_detected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn tab_switch_severity_depends_on_threshold() {
        let warning = ViolationEvent::tab_switch(2, 3, fixed_now());
        assert_eq!(warning.severity(), Severity::Medium);
        let terminal = ViolationEvent::tab_switch(3, 3, fixed_now());
        assert_eq!(terminal.severity(), Severity::High);
    }

    #[test]
    fn only_high_ai_detections_count_toward_limit() {
        assert!(ViolationEvent::multiple_faces(2, fixed_now()).counts_toward_ai_limit());
        assert!(!ViolationEvent::gaze_down(fixed_now()).counts_toward_ai_limit());
        assert!(!ViolationEvent::tab_switch(3, 3, fixed_now()).counts_toward_ai_limit());
        assert!(!ViolationEvent::camera_lost("ended", fixed_now()).counts_toward_ai_limit());
    }

    #[test]
    fn event_serializes_with_wire_field_names() {
        let event = ViolationEvent::no_face(3200, fixed_now());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "no_face");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["durationMs"], 3200);
        assert!(json.get("confidence").is_none());
    }

    #[test]
    fn severity_is_ordinal() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
