use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("detection interval must be > 0 ms")]
    InvalidDetectionInterval,

    #[error("no-face threshold must be > 0 ms")]
    InvalidNoFaceThreshold,

    #[error("object confidence threshold must be in [0, 1)")]
    InvalidObjectConfidence,

    #[error("gaze threshold must be in (0, 1)")]
    InvalidGazeThreshold,

    #[error("model backoff base must be > 0 and <= cap")]
    InvalidModelBackoff,

    #[error("tab switch threshold must be > 0")]
    InvalidTabSwitchThreshold,

    #[error("AI violation limit must be > 0")]
    InvalidAiViolationLimit,

    #[error("frame rate must be between 1 and 30")]
    InvalidFrameRate,

    #[error("reconnect backoff base must be > 0 and <= cap")]
    InvalidReconnectBackoff,

    #[error("camera poll interval must be > 0 ms")]
    InvalidCameraPollInterval,

    #[error("network timeout must be > 0 s")]
    InvalidNetworkTimeout,
}

//
// ─── SETTINGS ──────────────────────────────────────────────────────────────────
//

/// Tunables for one proctored attempt.
///
/// Every field has a production default; see [`ProctorSettings::default`].
/// Deserializing goes through [`ProctorSettingsDraft::validate`], so missing
/// fields take their defaults and invalid values are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProctorSettingsDraft")]
pub struct ProctorSettings {
    detection_interval_ms: u64,
    cooldown_ms: u64,
    no_face_threshold_ms: u64,
    object_confidence_threshold: f32,
    gaze_down_threshold: f32,
    model_load_retries: u32,
    model_backoff_base_ms: u64,
    model_backoff_cap_ms: u64,
    tab_switch_threshold: u32,
    ai_violation_limit: u32,
    frame_rate: u32,
    reconnect_base_ms: u64,
    reconnect_cap_ms: u64,
    reconnect_max_attempts: u32,
    camera_poll_ms: u64,
    network_timeout_secs: u64,
}

/// Partial overrides applied on top of the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProctorSettingsDraft {
    pub detection_interval_ms: Option<u64>,
    pub cooldown_ms: Option<u64>,
    pub no_face_threshold_ms: Option<u64>,
    pub object_confidence_threshold: Option<f32>,
    pub gaze_down_threshold: Option<f32>,
    pub model_load_retries: Option<u32>,
    pub model_backoff_base_ms: Option<u64>,
    pub model_backoff_cap_ms: Option<u64>,
    pub tab_switch_threshold: Option<u32>,
    pub ai_violation_limit: Option<u32>,
    pub frame_rate: Option<u32>,
    pub reconnect_base_ms: Option<u64>,
    pub reconnect_cap_ms: Option<u64>,
    pub reconnect_max_attempts: Option<u32>,
    pub camera_poll_ms: Option<u64>,
    pub network_timeout_secs: Option<u64>,
}

impl ProctorSettingsDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge overrides onto the defaults and validate the result.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` describing the first invalid value.
    pub fn validate(self) -> Result<ProctorSettings, SettingsError> {
        let d = ProctorSettings::default();
        let settings = ProctorSettings {
            detection_interval_ms: self.detection_interval_ms.unwrap_or(d.detection_interval_ms),
            cooldown_ms: self.cooldown_ms.unwrap_or(d.cooldown_ms),
            no_face_threshold_ms: self.no_face_threshold_ms.unwrap_or(d.no_face_threshold_ms),
            object_confidence_threshold: self
                .object_confidence_threshold
                .unwrap_or(d.object_confidence_threshold),
            gaze_down_threshold: self.gaze_down_threshold.unwrap_or(d.gaze_down_threshold),
            model_load_retries: self.model_load_retries.unwrap_or(d.model_load_retries),
            model_backoff_base_ms: self.model_backoff_base_ms.unwrap_or(d.model_backoff_base_ms),
            model_backoff_cap_ms: self.model_backoff_cap_ms.unwrap_or(d.model_backoff_cap_ms),
            tab_switch_threshold: self.tab_switch_threshold.unwrap_or(d.tab_switch_threshold),
            ai_violation_limit: self.ai_violation_limit.unwrap_or(d.ai_violation_limit),
            frame_rate: self.frame_rate.unwrap_or(d.frame_rate),
            reconnect_base_ms: self.reconnect_base_ms.unwrap_or(d.reconnect_base_ms),
            reconnect_cap_ms: self.reconnect_cap_ms.unwrap_or(d.reconnect_cap_ms),
            reconnect_max_attempts: self
                .reconnect_max_attempts
                .unwrap_or(d.reconnect_max_attempts),
            camera_poll_ms: self.camera_poll_ms.unwrap_or(d.camera_poll_ms),
            network_timeout_secs: self.network_timeout_secs.unwrap_or(d.network_timeout_secs),
        };
        settings.check()?;
        Ok(settings)
    }
}

impl TryFrom<ProctorSettingsDraft> for ProctorSettings {
    type Error = SettingsError;

    fn try_from(draft: ProctorSettingsDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl Default for ProctorSettings {
    fn default() -> Self {
        Self {
            detection_interval_ms: 2_000,
            cooldown_ms: 5_000,
            no_face_threshold_ms: 3_000,
            object_confidence_threshold: 0.2,
            gaze_down_threshold: 0.05,
            model_load_retries: 3,
            model_backoff_base_ms: 1_000,
            model_backoff_cap_ms: 5_000,
            tab_switch_threshold: 3,
            ai_violation_limit: 5,
            frame_rate: 5,
            reconnect_base_ms: 2_000,
            reconnect_cap_ms: 10_000,
            reconnect_max_attempts: 10,
            camera_poll_ms: 2_000,
            network_timeout_secs: 30,
        }
    }
}

impl ProctorSettings {
    fn check(&self) -> Result<(), SettingsError> {
        if self.detection_interval_ms == 0 {
            return Err(SettingsError::InvalidDetectionInterval);
        }
        if self.no_face_threshold_ms == 0 {
            return Err(SettingsError::InvalidNoFaceThreshold);
        }
        if !self.object_confidence_threshold.is_finite()
            || !(0.0..1.0).contains(&self.object_confidence_threshold)
        {
            return Err(SettingsError::InvalidObjectConfidence);
        }
        if !self.gaze_down_threshold.is_finite()
            || self.gaze_down_threshold <= 0.0
            || self.gaze_down_threshold >= 1.0
        {
            return Err(SettingsError::InvalidGazeThreshold);
        }
        if self.model_backoff_base_ms == 0 || self.model_backoff_base_ms > self.model_backoff_cap_ms
        {
            return Err(SettingsError::InvalidModelBackoff);
        }
        if self.tab_switch_threshold == 0 {
            return Err(SettingsError::InvalidTabSwitchThreshold);
        }
        if self.ai_violation_limit == 0 {
            return Err(SettingsError::InvalidAiViolationLimit);
        }
        if !(1..=30).contains(&self.frame_rate) {
            return Err(SettingsError::InvalidFrameRate);
        }
        if self.reconnect_base_ms == 0 || self.reconnect_base_ms > self.reconnect_cap_ms {
            return Err(SettingsError::InvalidReconnectBackoff);
        }
        if self.camera_poll_ms == 0 {
            return Err(SettingsError::InvalidCameraPollInterval);
        }
        if self.network_timeout_secs == 0 {
            return Err(SettingsError::InvalidNetworkTimeout);
        }
        Ok(())
    }

    // Accessors
    #[must_use]
    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    /// Minimum gap between two emissions of the same violation category.
    #[must_use]
    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms
    }

    #[must_use]
    pub fn no_face_threshold_ms(&self) -> u64 {
        self.no_face_threshold_ms
    }

    #[must_use]
    pub fn object_confidence_threshold(&self) -> f32 {
        self.object_confidence_threshold
    }

    #[must_use]
    pub fn gaze_down_threshold(&self) -> f32 {
        self.gaze_down_threshold
    }

    #[must_use]
    pub fn model_load_retries(&self) -> u32 {
        self.model_load_retries
    }

    /// Delay before model-load retry number `attempt` (0-based):
    /// `min(base * 2^attempt, cap)`.
    #[must_use]
    pub fn model_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(capped_exponential(
            self.model_backoff_base_ms,
            attempt,
            self.model_backoff_cap_ms,
        ))
    }

    #[must_use]
    pub fn tab_switch_threshold(&self) -> u32 {
        self.tab_switch_threshold
    }

    #[must_use]
    pub fn ai_violation_limit(&self) -> u32 {
        self.ai_violation_limit
    }

    #[must_use]
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Gap between two captured frames (`1000 / frame_rate` ms).
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1_000 / u64::from(self.frame_rate))
    }

    /// Delay before reconnect attempt number `attempt` (1-based):
    /// `min(base * 2^(attempt - 1), cap)`.
    #[must_use]
    pub fn reconnect_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(capped_exponential(
            self.reconnect_base_ms,
            attempt.saturating_sub(1),
            self.reconnect_cap_ms,
        ))
    }

    #[must_use]
    pub fn reconnect_max_attempts(&self) -> u32 {
        self.reconnect_max_attempts
    }

    #[must_use]
    pub fn camera_poll_interval(&self) -> Duration {
        Duration::from_millis(self.camera_poll_ms)
    }

    /// Upper bound for any single network call (save, submit, model acquisition).
    #[must_use]
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }
}

fn capped_exponential(base_ms: u64, exponent: u32, cap_ms: u64) -> u64 {
    let factor = 1_u64.checked_shl(exponent).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(cap_ms)
}
