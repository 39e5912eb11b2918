//! In-process implementations of the engine's device and network seams.
//!
//! They let a full session run without a camera, models, or a server: the CLI's
//! simulated run and the integration tests both drive them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use exam_core::model::SessionMeta;
use tokio::sync::mpsc;

use crate::camera::{CameraAccess, CameraFeed, Frame, TrackState};
use crate::detector::{DetectionCapability, FaceDetection, FrameAnalysis, ObjectDetection};
use crate::error::{CameraError, DetectionError, ScreenError, TransportError};
use crate::guard::ScreenControl;
use crate::streamer::{FrameMessage, HealthPing, HealthPong, Transport, TransportEvent};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consume one unit from a failure budget; `true` means "fail this call".
fn take_one(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
        .is_ok()
}

//
// ─── CAMERA ────────────────────────────────────────────────────────────────────
//

/// Smallest valid JPEG-looking payload; only its bytes travel, nothing decodes it.
const STILL: &[u8] = &[0xFF, 0xD8, 0xFF, 0xD9];

#[derive(Debug)]
struct CameraState {
    denied: AtomicBool,
    ready: AtomicBool,
    released: AtomicBool,
    track: Mutex<TrackState>,
}

/// A camera that always shows the same still. Clones share state.
#[derive(Debug, Clone)]
pub struct LoopbackCamera {
    state: Arc<CameraState>,
}

impl Default for LoopbackCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackCamera {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(CameraState {
                denied: AtomicBool::new(false),
                ready: AtomicBool::new(true),
                released: AtomicBool::new(false),
                track: Mutex::new(TrackState::live()),
            }),
        }
    }

    pub fn deny_permission(&self) {
        self.state.denied.store(true, Ordering::Release);
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.ready.store(ready, Ordering::Release);
    }

    pub fn end_track(&self) {
        lock(&self.state.track).ended = true;
    }

    pub fn disable_track(&self) {
        lock(&self.state.track).enabled = false;
    }

    /// The device vanished: the stream has no video track left.
    pub fn remove_tracks(&self) {
        lock(&self.state.track).track_count = 0;
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.state.released.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CameraFeed for LoopbackCamera {
    fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::Acquire)
    }

    fn track_state(&self) -> TrackState {
        *lock(&self.state.track)
    }

    async fn capture(&self) -> Result<Frame, CameraError> {
        if !self.is_ready() {
            return Err(CameraError::NotReady);
        }
        Ok(Frame {
            data: Bytes::from_static(STILL),
            width: 320,
            height: 240,
        })
    }

    fn release(&self) {
        self.state.released.store(true, Ordering::Release);
    }
}

#[async_trait]
impl CameraAccess for LoopbackCamera {
    async fn open(&self) -> Result<Arc<dyn CameraFeed>, CameraError> {
        if self.state.denied.load(Ordering::Acquire) {
            return Err(CameraError::PermissionDenied);
        }
        self.state.released.store(false, Ordering::Release);
        Ok(Arc::new(self.clone()))
    }
}

//
// ─── DETECTION ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Default)]
struct Script {
    steady: FrameAnalysis,
    queued: VecDeque<FrameAnalysis>,
    current: FrameAnalysis,
}

/// Detection that reports whatever it was told to.
///
/// Each tick takes the next queued analysis, falling back to the steady one.
#[derive(Debug)]
pub struct ScriptedDetection {
    script: Mutex<Script>,
    load_failures: AtomicU32,
    inference_failures: AtomicU32,
    load_attempts: AtomicU32,
}

impl Default for ScriptedDetection {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDetection {
    /// Starts out seeing one attentive face.
    #[must_use]
    pub fn new() -> Self {
        let steady = FrameAnalysis {
            faces: vec![FaceDetection {
                score: 0.95,
                keypoints: None,
            }],
            objects: Vec::new(),
        };
        Self {
            script: Mutex::new(Script {
                steady,
                ..Script::default()
            }),
            load_failures: AtomicU32::new(0),
            inference_failures: AtomicU32::new(0),
            load_attempts: AtomicU32::new(0),
        }
    }

    /// What every tick sees once the queue is empty.
    pub fn set_analysis(&self, analysis: FrameAnalysis) {
        lock(&self.script).steady = analysis;
    }

    pub fn push_analysis(&self, analysis: FrameAnalysis) {
        lock(&self.script).queued.push_back(analysis);
    }

    pub fn fail_next_loads(&self, count: u32) {
        self.load_failures.store(count, Ordering::Release);
    }

    pub fn fail_next_inferences(&self, count: u32) {
        self.inference_failures.store(count, Ordering::Release);
    }

    #[must_use]
    pub fn load_attempts(&self) -> u32 {
        self.load_attempts.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DetectionCapability for ScriptedDetection {
    async fn load_face_model(&self) -> Result<(), DetectionError> {
        self.load_attempts.fetch_add(1, Ordering::AcqRel);
        if take_one(&self.load_failures) {
            return Err(DetectionError::ModelLoad("face model unreachable".into()));
        }
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
        if take_one(&self.inference_failures) {
            return Err(DetectionError::Inference("backend busy".into()));
        }
        let mut script = lock(&self.script);
        let next = script
            .queued
            .pop_front()
            .unwrap_or_else(|| script.steady.clone());
        script.current = next;
        Ok(script.current.faces.clone())
    }

    async fn detect_objects(
        &self,
        _frame: &Frame,
        _timestamp_ms: i64,
    ) -> Result<Vec<ObjectDetection>, DetectionError> {
        Ok(lock(&self.script).current.objects.clone())
    }
}

//
// ─── TRANSPORT ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Default)]
struct Link {
    inbound: Option<mpsc::UnboundedSender<TransportEvent>>,
    frames: Vec<FrameMessage>,
    pongs: Vec<HealthPong>,
    joined: Vec<SessionMeta>,
    left: Vec<SessionMeta>,
    connects: u32,
}

/// A transport that records everything sent and lets tests inject server traffic.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    link: Mutex<Link>,
    refuse: AtomicBool,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Release);
    }

    /// Deliver a health check on the open link. Returns `false` if not connected.
    pub fn ping(&self, id: u64, sent_at_ms: i64) -> bool {
        let link = lock(&self.link);
        link.inbound.as_ref().is_some_and(|tx| {
            tx.send(TransportEvent::HealthCheck(HealthPing { id, sent_at_ms }))
                .is_ok()
        })
    }

    /// Simulate the server dropping the connection.
    pub fn drop_link(&self, reason: &str) {
        if let Some(tx) = lock(&self.link).inbound.take() {
            let _ = tx.send(TransportEvent::Disconnected {
                reason: reason.to_owned(),
            });
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.link).inbound.is_some()
    }

    #[must_use]
    pub fn frames(&self) -> Vec<FrameMessage> {
        lock(&self.link).frames.clone()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        lock(&self.link).frames.len()
    }

    #[must_use]
    pub fn pongs(&self) -> Vec<HealthPong> {
        lock(&self.link).pongs.clone()
    }

    #[must_use]
    pub fn joins(&self) -> usize {
        lock(&self.link).joined.len()
    }

    #[must_use]
    pub fn leaves(&self) -> usize {
        lock(&self.link).left.len()
    }

    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        lock(&self.link).connects
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let mut link = lock(&self.link);
        link.connects += 1;
        if self.refuse.load(Ordering::Acquire) {
            return Err(TransportError::Connect("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        link.inbound = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) {
        lock(&self.link).inbound = None;
    }

    async fn join(&self, meta: &SessionMeta) -> Result<(), TransportError> {
        let mut link = lock(&self.link);
        if link.inbound.is_none() {
            return Err(TransportError::NotConnected);
        }
        link.joined.push(meta.clone());
        Ok(())
    }

    async fn leave(&self, meta: &SessionMeta) -> Result<(), TransportError> {
        let mut link = lock(&self.link);
        if link.inbound.is_none() {
            return Err(TransportError::NotConnected);
        }
        link.left.push(meta.clone());
        Ok(())
    }

    async fn send_frame(&self, message: &FrameMessage) -> Result<(), TransportError> {
        let mut link = lock(&self.link);
        if link.inbound.is_none() {
            return Err(TransportError::NotConnected);
        }
        link.frames.push(message.clone());
        Ok(())
    }

    async fn send_pong(&self, pong: &HealthPong) -> Result<(), TransportError> {
        let mut link = lock(&self.link);
        if link.inbound.is_none() {
            return Err(TransportError::NotConnected);
        }
        link.pongs.push(pong.clone());
        Ok(())
    }
}

//
// ─── SCREEN ────────────────────────────────────────────────────────────────────
//

#[derive(Debug)]
pub struct LoopbackScreen {
    allow: AtomicBool,
    fullscreen: AtomicBool,
    requests: AtomicU32,
}

impl Default for LoopbackScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackScreen {
    #[must_use]
    pub fn new() -> Self {
        Self {
            allow: AtomicBool::new(true),
            fullscreen: AtomicBool::new(false),
            requests: AtomicU32::new(0),
        }
    }

    /// A host that refuses every fullscreen request.
    #[must_use]
    pub fn denying() -> Self {
        let screen = Self::new();
        screen.allow.store(false, Ordering::Release);
        screen
    }

    #[must_use]
    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ScreenControl for LoopbackScreen {
    async fn request_fullscreen(&self) -> Result<(), ScreenError> {
        self.requests.fetch_add(1, Ordering::AcqRel);
        if !self.allow.load(Ordering::Acquire) {
            return Err(ScreenError::Denied);
        }
        self.fullscreen.store(true, Ordering::Release);
        Ok(())
    }

    async fn exit_fullscreen(&self) {
        self.fullscreen.store(false, Ordering::Release);
    }
}
