use exam_core::model::ViolationEvent;

use crate::detector::DetectorStatus;
use crate::streamer::ConnectionState;

/// Everything the background components report to the controller.
///
/// Each session gets its own channel, so events from a torn-down session can never
/// reach a later one.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One second elapsed; carries the seconds still left.
    ClockTick { remaining_seconds: u32 },
    /// The countdown reached zero. Sent at most once per session.
    ClockExpired,
    /// A rule fired in the violation detector.
    Violation(ViolationEvent),
    Detector(DetectorStatus),
    Connection(ConnectionState),
    /// The camera track ended, was disabled, or vanished.
    CameraLost { reason: String },
}

pub(crate) type EventSender = tokio::sync::mpsc::UnboundedSender<SessionEvent>;
pub(crate) type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<SessionEvent>;
