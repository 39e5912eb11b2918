#![forbid(unsafe_code)]

pub mod backend;
pub mod camera;
pub mod clock;
pub mod controller;
pub mod detector;
pub mod error;
pub mod event;
pub mod guard;
pub mod loopback;
pub mod streamer;
mod tasks;

pub use exam_core::Clock;

pub use backend::{ExamBackend, HttpBackend, HttpBackendConfig, StorageBackend};
pub use camera::{CameraAccess, CameraFeed, Frame, TrackState};
pub use clock::SessionClock;
pub use controller::{SessionController, SessionDeps, SessionOutcome};
pub use detector::{DetectionCapability, DetectorStatus, ViolationDetector};
pub use error::{
    BackendError, CameraError, DetectionError, ScreenError, SessionError, TransportError,
};
pub use event::SessionEvent;
pub use guard::{EnvironmentGuard, EnvironmentState, GuardSignal, ScreenControl};
pub use streamer::{ConnectionPhase, ConnectionState, TelemetryStreamer, Transport};
