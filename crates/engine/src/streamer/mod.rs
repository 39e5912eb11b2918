//! Realtime telemetry: camera frames out, health checks answered, camera watched.
//!
//! Two tasks share one cancellation token: the link task (connect, join, stream,
//! reconnect with capped backoff) and the camera poll. When the poll sees the camera
//! go away it reports `CameraLost` once and cancels both.

mod connection;
mod message;
mod transport;

pub use connection::{ConnectionPhase, ConnectionState};
pub use message::{FrameMessage, HealthPing, HealthPong, Liveness};
pub use transport::{Transport, TransportEvent};

use std::sync::Arc;
use std::time::Duration;

use exam_core::model::{SessionMeta, ViolationSnapshot};
use exam_core::{Clock, ProctorSettings};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::CameraFeed;
use crate::event::{EventSender, SessionEvent};
use crate::tasks::{Interrupted, TaskGroup, bounded, sleep_or_cancel};
use connection::{ConnectionMachine, Reconnect};

pub struct TelemetryStreamer {
    settings: ProctorSettings,
    transport: Arc<dyn Transport>,
    feed: Arc<dyn CameraFeed>,
    meta: SessionMeta,
    snapshots: watch::Receiver<ViolationSnapshot>,
    clock: Clock,
}

#[derive(Debug, Default)]
struct LinkStats {
    frames_sent: u64,
    send_failures: u32,
}

enum LinkEnd {
    Cancelled,
    Dropped(String),
}

enum OpenError {
    Cancelled,
    Failed(String),
}

impl TelemetryStreamer {
    #[must_use]
    pub fn new(
        settings: ProctorSettings,
        transport: Arc<dyn Transport>,
        feed: Arc<dyn CameraFeed>,
        meta: SessionMeta,
        snapshots: watch::Receiver<ViolationSnapshot>,
        clock: Clock,
    ) -> Self {
        Self {
            settings,
            transport,
            feed,
            meta,
            snapshots,
            clock,
        }
    }

    pub(crate) fn spawn(self, tasks: &mut TaskGroup, events: EventSender) {
        let token = tasks.child_token();
        tasks.spawn(watch_camera(
            Arc::clone(&self.feed),
            self.settings.camera_poll_interval(),
            events.clone(),
            token.clone(),
        ));
        tasks.spawn(self.run(events, token));
    }

    async fn run(self, events: EventSender, token: CancellationToken) {
        let mut machine = ConnectionMachine::new(self.settings.reconnect_max_attempts());
        let mut stats = LinkStats::default();
        machine.connecting();
        report(&events, &machine);

        loop {
            match self.open_link(&token).await {
                Ok(inbound) => {
                    machine.connected();
                    report(&events, &machine);
                    info!(session_id = %self.meta.session_id, "telemetry connected");
                    match self
                        .pump(inbound, &mut machine, &mut stats, &events, &token)
                        .await
                    {
                        LinkEnd::Cancelled => return,
                        LinkEnd::Dropped(reason) => warn!(%reason, "telemetry link dropped"),
                    }
                }
                Err(OpenError::Cancelled) => return,
                Err(OpenError::Failed(reason)) => warn!(%reason, "telemetry connect failed"),
            }

            let decision = machine.failed();
            report(&events, &machine);
            match decision {
                Reconnect::After { attempt } => {
                    let delay = self.settings.reconnect_backoff(attempt);
                    debug!(attempt, ?delay, "reconnecting");
                    if !sleep_or_cancel(delay, &token).await {
                        return;
                    }
                }
                Reconnect::GiveUp => {
                    warn!(
                        attempts = self.settings.reconnect_max_attempts(),
                        "telemetry reconnect attempts exhausted"
                    );
                    return;
                }
            }
        }
    }

    /// Connect and announce the session.
    async fn open_link(
        &self,
        token: &CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, OpenError> {
        let limit = self.settings.network_timeout();
        let inbound = match bounded(limit, token, self.transport.connect()).await {
            Ok(Ok(inbound)) => inbound,
            Ok(Err(err)) => return Err(OpenError::Failed(err.to_string())),
            Err(Interrupted::TimedOut) => return Err(OpenError::Failed("connect timed out".into())),
            Err(Interrupted::Cancelled) => return Err(OpenError::Cancelled),
        };
        match bounded(limit, token, self.transport.join(&self.meta)).await {
            Ok(Ok(())) => Ok(inbound),
            Err(Interrupted::Cancelled) => Err(OpenError::Cancelled),
            Ok(Err(err)) => {
                self.transport.disconnect().await;
                Err(OpenError::Failed(format!("join failed: {err}")))
            }
            Err(Interrupted::TimedOut) => {
                self.transport.disconnect().await;
                Err(OpenError::Failed("join timed out".into()))
            }
        }
    }

    async fn pump(
        &self,
        mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
        machine: &mut ConnectionMachine,
        stats: &mut LinkStats,
        events: &EventSender,
        token: &CancellationToken,
    ) -> LinkEnd {
        let interval = self.settings.frame_interval();
        let mut frames = tokio::time::interval_at(Instant::now() + interval, interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => return LinkEnd::Cancelled,
                message = inbound.recv() => match message {
                    Some(TransportEvent::HealthCheck(ping)) => {
                        self.answer_ping(ping, machine, stats).await;
                        report(events, machine);
                    }
                    Some(TransportEvent::Disconnected { reason }) => return LinkEnd::Dropped(reason),
                    None => return LinkEnd::Dropped("transport closed".into()),
                },
                _ = frames.tick() => self.push_frame(stats).await,
            }
        }
    }

    async fn push_frame(&self, stats: &mut LinkStats) {
        if !self.feed.is_ready() || !self.feed.track_state().is_live() {
            return;
        }
        let frame = match self.feed.capture().await {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "frame capture failed");
                return;
            }
        };
        let snapshot = *self.snapshots.borrow();
        let message = FrameMessage::new(&self.meta, frame.data, self.clock.epoch_ms(), snapshot);

        match tokio::time::timeout(self.send_limit(), self.transport.send_frame(&message)).await {
            Ok(Ok(())) => {
                stats.frames_sent += 1;
                stats.send_failures = 0;
            }
            Ok(Err(err)) => {
                stats.send_failures += 1;
                debug!(error = %err, failures = stats.send_failures, "frame send failed");
            }
            Err(_) => {
                stats.send_failures += 1;
                debug!(failures = stats.send_failures, "frame send timed out");
            }
        }
    }

    async fn answer_ping(&self, ping: HealthPing, machine: &mut ConnectionMachine, stats: &LinkStats) {
        let now_ms = self.clock.epoch_ms();
        let latency_ms = u64::try_from(now_ms.saturating_sub(ping.sent_at_ms)).unwrap_or(0);
        machine.record_latency(latency_ms);

        let camera_active = self.feed.track_state().is_live();
        let liveness = if !camera_active {
            Liveness::CameraInactive
        } else if stats.send_failures > 0 {
            Liveness::Degraded
        } else {
            Liveness::Healthy
        };
        let pong = HealthPong {
            ping_id: ping.id,
            session_id: self.meta.session_id,
            liveness,
            camera_active,
            frames_sent: stats.frames_sent,
            responded_at_ms: now_ms,
        };
        match tokio::time::timeout(self.send_limit(), self.transport.send_pong(&pong)).await {
            Ok(Ok(())) => debug!(ping_id = ping.id, latency_ms, ?liveness, "health check answered"),
            Ok(Err(err)) => warn!(error = %err, "health check reply failed"),
            Err(_) => warn!("health check reply timed out"),
        }
    }

    /// Frames are superseded quickly, so sends get one frame interval at most.
    fn send_limit(&self) -> Duration {
        self.settings.frame_interval().min(self.settings.network_timeout())
    }
}

fn report(events: &EventSender, machine: &ConnectionMachine) {
    let _ = events.send(SessionEvent::Connection(machine.state()));
}

async fn watch_camera(
    feed: Arc<dyn CameraFeed>,
    every: Duration,
    events: EventSender,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let Some(reason) = feed.track_state().loss_reason() {
            warn!(reason, "camera lost");
            let _ = events.send(SessionEvent::CameraLost {
                reason: reason.to_owned(),
            });
            token.cancel();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackCamera, LoopbackTransport};
    use exam_core::model::{SessionId, StudentId, TestId};
    use exam_core::time::fixed_clock;

    fn meta() -> SessionMeta {
        SessionMeta {
            session_id: SessionId::generate(),
            student_id: StudentId::new("s-1").unwrap(),
            student_name: "Ada".into(),
            test_id: TestId::new("t-1").unwrap(),
            test_title: "Algebra".into(),
        }
    }

    struct Harness {
        events: mpsc::UnboundedReceiver<SessionEvent>,
        tasks: TaskGroup,
        snapshots: watch::Sender<ViolationSnapshot>,
    }

    fn start(transport: Arc<LoopbackTransport>, camera: Arc<LoopbackCamera>) -> Harness {
        let (snapshots, rx) = watch::channel(ViolationSnapshot::default());
        let streamer = TelemetryStreamer::new(
            ProctorSettings::default(),
            transport,
            camera,
            meta(),
            rx,
            fixed_clock(),
        );
        let (tx, events) = mpsc::unbounded_channel();
        let mut tasks = TaskGroup::new();
        streamer.spawn(&mut tasks, tx);
        Harness {
            events,
            tasks,
            snapshots,
        }
    }

    async fn wait_for_phase(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
        phase: ConnectionPhase,
    ) -> ConnectionState {
        loop {
            match events.recv().await {
                Some(SessionEvent::Connection(state)) if state.phase == phase => return state,
                Some(_) => {}
                None => panic!("streamer stopped before reaching {phase:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn streams_frames_with_latest_snapshot() {
        let transport = Arc::new(LoopbackTransport::new());
        let mut harness = start(Arc::clone(&transport), Arc::new(LoopbackCamera::new()));
        wait_for_phase(&mut harness.events, ConnectionPhase::Connected).await;
        harness.snapshots.send_replace(ViolationSnapshot {
            no_face: true,
            ..ViolationSnapshot::default()
        });

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        let frames = transport.frames();
        assert_eq!(frames.len(), 5);
        assert!(frames.iter().all(|frame| frame.violation_snapshot.no_face));
        assert_eq!(transport.joins(), 1);
        harness.tasks.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn answers_health_checks() {
        let transport = Arc::new(LoopbackTransport::new());
        let mut harness = start(Arc::clone(&transport), Arc::new(LoopbackCamera::new()));
        wait_for_phase(&mut harness.events, ConnectionPhase::Connected).await;

        transport.ping(7, fixed_clock().epoch_ms() - 40);
        let state = wait_for_phase(&mut harness.events, ConnectionPhase::Connected).await;
        assert_eq!(state.last_latency_ms, Some(40));

        let pongs = transport.pongs();
        assert_eq!(pongs.len(), 1);
        assert_eq!(pongs[0].ping_id, 7);
        assert_eq!(pongs[0].liveness, Liveness::Healthy);
        harness.tasks.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn rejoins_after_drop() {
        let transport = Arc::new(LoopbackTransport::new());
        let mut harness = start(Arc::clone(&transport), Arc::new(LoopbackCamera::new()));
        wait_for_phase(&mut harness.events, ConnectionPhase::Connected).await;

        transport.drop_link("server restart");
        let retry = wait_for_phase(&mut harness.events, ConnectionPhase::Reconnecting).await;
        assert_eq!(retry.attempt, 1);
        wait_for_phase(&mut harness.events, ConnectionPhase::Connected).await;
        assert_eq!(transport.joins(), 2);
        harness.tasks.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_ten_attempts() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.refuse_connections(true);
        let mut harness = start(Arc::clone(&transport), Arc::new(LoopbackCamera::new()));

        let started = Instant::now();
        let failed = wait_for_phase(&mut harness.events, ConnectionPhase::Failed).await;
        assert_eq!(failed.phase, ConnectionPhase::Failed);
        // 2 + 4 + 8 + 7 * 10 seconds of backoff across ten retries.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(84) && waited < Duration::from_secs(85));
        assert_eq!(transport.connect_attempts(), 11);
        harness.tasks.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn camera_loss_is_reported_once_and_stops_streaming() {
        let transport = Arc::new(LoopbackTransport::new());
        let camera = Arc::new(LoopbackCamera::new());
        let mut harness = start(Arc::clone(&transport), Arc::clone(&camera));
        wait_for_phase(&mut harness.events, ConnectionPhase::Connected).await;

        camera.end_track();
        let mut lost = 0;
        while let Some(event) = harness.events.recv().await {
            if let SessionEvent::CameraLost { reason } = event {
                assert_eq!(reason, "video track ended");
                lost += 1;
            }
        }
        assert_eq!(lost, 1);
        let sent = transport.frames().len();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.frames().len(), sent);
    }
}
