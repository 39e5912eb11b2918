//! Session countdown.
//!
//! Remaining time is derived from a monotonic deadline rather than by decrementing a
//! counter, so a delayed tick never lets the countdown drift.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event::{EventSender, SessionEvent};

const TICK: Duration = Duration::from_secs(1);

/// Per-session countdown task.
///
/// Emits `ClockTick` once per second and `ClockExpired` exactly once when the
/// remaining time reaches zero, then halts.
#[derive(Debug)]
pub struct SessionClock {
    remaining: Arc<AtomicU32>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SessionClock {
    /// Start counting down from `remaining_seconds`.
    ///
    /// The task stops on its own at expiry, when `stop` is called, or when `parent`
    /// is cancelled.
    pub(crate) fn start(
        remaining_seconds: u32,
        events: EventSender,
        parent: &CancellationToken,
    ) -> Self {
        let remaining = Arc::new(AtomicU32::new(remaining_seconds));
        let token = parent.child_token();
        let handle = tokio::spawn(count_down(
            remaining_seconds,
            Arc::clone(&remaining),
            events,
            token.clone(),
        ));
        Self {
            remaining,
            token,
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Cancel the countdown. Idempotent.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for SessionClock {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn count_down(
    seconds: u32,
    remaining: Arc<AtomicU32>,
    events: EventSender,
    token: CancellationToken,
) {
    if seconds == 0 {
        info!("session started with no time left");
        let _ = events.send(SessionEvent::ClockExpired);
        return;
    }

    let started = Instant::now();
    let deadline = started + Duration::from_secs(u64::from(seconds));
    let mut ticker = tokio::time::interval_at(started + TICK, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!("countdown cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let left = seconds_left(deadline.saturating_duration_since(Instant::now()));
        remaining.store(left, Ordering::Release);
        if left == 0 {
            info!("countdown expired");
            let _ = events.send(SessionEvent::ClockExpired);
            return;
        }
        if events
            .send(SessionEvent::ClockTick {
                remaining_seconds: left,
            })
            .is_err()
        {
            return;
        }
    }
}

/// Whole seconds left, rounded up so the display only reads zero at the deadline.
fn seconds_left(left: Duration) -> u32 {
    let millis = left.as_millis();
    u32::try_from(millis.div_ceil(1_000)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn partial_seconds_round_up() {
        assert_eq!(seconds_left(Duration::ZERO), 0);
        assert_eq!(seconds_left(Duration::from_millis(1)), 1);
        assert_eq!(seconds_left(Duration::from_millis(1_000)), 1);
        assert_eq!(seconds_left(Duration::from_millis(1_001)), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expires_exactly_once_after_seeded_seconds() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let parent = CancellationToken::new();
        let clock = SessionClock::start(2, tx, &parent);

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::ClockTick {
                remaining_seconds: 1
            })
        );
        assert_eq!(rx.recv().await, Some(SessionEvent::ClockExpired));
        assert_eq!(clock.remaining_seconds(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_silences_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let parent = CancellationToken::new();
        let mut clock = SessionClock::start(60, tx, &parent);

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::ClockTick {
                remaining_seconds: 59
            })
        );
        clock.stop();
        clock.stop();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(clock.remaining_seconds(), 59);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_seconds_expires_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _clock = SessionClock::start(0, tx, &CancellationToken::new());
        assert_eq!(rx.recv().await, Some(SessionEvent::ClockExpired));
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_stops_countdown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let parent = CancellationToken::new();
        let _clock = SessionClock::start(10, tx, &parent);
        parent.cancel();
        assert_eq!(rx.recv().await, None);
    }
}
