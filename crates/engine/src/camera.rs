//! Camera device seam shared by the detector and the streamer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CameraError;

/// One encoded still captured from the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Observable state of the live video tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackState {
    pub track_count: u32,
    pub enabled: bool,
    pub ended: bool,
}

impl TrackState {
    #[must_use]
    pub fn live() -> Self {
        Self {
            track_count: 1,
            enabled: true,
            ended: false,
        }
    }

    /// Why the camera should be considered lost, or `None` while it is live.
    #[must_use]
    pub fn loss_reason(&self) -> Option<&'static str> {
        if self.track_count == 0 {
            Some("no video track")
        } else if self.ended {
            Some("video track ended")
        } else if !self.enabled {
            Some("video track disabled")
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.loss_reason().is_none()
    }
}

/// An opened camera stream.
#[async_trait]
pub trait CameraFeed: Send + Sync {
    /// Whether the device is producing frames yet.
    fn is_ready(&self) -> bool;

    fn track_state(&self) -> TrackState;

    /// Grab the current frame, already encoded for transport.
    ///
    /// # Errors
    ///
    /// Returns `CameraError` if the device is not ready or the capture fails.
    async fn capture(&self) -> Result<Frame, CameraError>;

    /// Release the device. Safe to call more than once.
    fn release(&self);
}

/// Opens the camera for a session.
#[async_trait]
pub trait CameraAccess: Send + Sync {
    /// # Errors
    ///
    /// Returns `CameraError::PermissionDenied` when the candidate refuses access, or
    /// `CameraError::Unavailable` when no device can be opened.
    async fn open(&self) -> Result<Arc<dyn CameraFeed>, CameraError>;
}
