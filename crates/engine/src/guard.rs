//! Fullscreen and focus enforcement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::ViolationEvent;
use tracing::{debug, info, warn};

use crate::error::ScreenError;

/// Host control over the exam window.
#[async_trait]
pub trait ScreenControl: Send + Sync {
    /// # Errors
    ///
    /// Returns `ScreenError` when the host refuses or cannot enter fullscreen.
    async fn request_fullscreen(&self) -> Result<(), ScreenError>;

    async fn exit_fullscreen(&self);
}

/// Where the exam window currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    Fullscreen,
    /// Visible but outside fullscreen; the candidate should be prompted to return.
    Exited,
    /// The window lost visibility or focus.
    Hidden,
}

/// What the controller must do in response to an environment change.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardSignal {
    /// A switch below the limit.
    Warning(ViolationEvent),
    /// The switch that reached the limit. Raised once; the guard goes quiet after it.
    Terminal(ViolationEvent),
    FullscreenLost,
    FullscreenRestored,
}

/// Counts visibility losses while the session is active.
///
/// The count never resets within a session, and inputs outside the active window
/// (before `start`, after `stop`, or after the terminal switch) change nothing.
#[derive(Debug, Clone)]
pub struct EnvironmentGuard {
    threshold: u32,
    active: bool,
    tripped: bool,
    fullscreen: bool,
    visible: bool,
    switch_count: u32,
}

impl EnvironmentGuard {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            active: false,
            tripped: false,
            fullscreen: false,
            visible: true,
            switch_count: 0,
        }
    }

    /// Begin enforcing. `fullscreen` reports whether the initial request succeeded.
    pub fn start(&mut self, fullscreen: bool) {
        self.active = true;
        self.tripped = false;
        self.fullscreen = fullscreen;
        self.visible = true;
        debug!(fullscreen, "environment guard started");
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active && !self.tripped
    }

    #[must_use]
    pub fn switch_count(&self) -> u32 {
        self.switch_count
    }

    #[must_use]
    pub fn state(&self) -> EnvironmentState {
        match (self.visible, self.fullscreen) {
            (false, _) => EnvironmentState::Hidden,
            (true, true) => EnvironmentState::Fullscreen,
            (true, false) => EnvironmentState::Exited,
        }
    }

    /// True while the candidate should be shown the "return to fullscreen" prompt.
    #[must_use]
    pub fn needs_fullscreen_prompt(&self) -> bool {
        self.is_active() && !self.fullscreen
    }

    /// Record a visibility or focus change.
    ///
    /// Only a visible-to-hidden transition counts as a switch.
    pub fn on_visibility_change(
        &mut self,
        visible: bool,
        observed_at: DateTime<Utc>,
    ) -> Option<GuardSignal> {
        let was_visible = self.visible;
        self.visible = visible;
        if !self.is_active() || visible || !was_visible {
            return None;
        }

        self.switch_count += 1;
        let event = ViolationEvent::tab_switch(self.switch_count, self.threshold, observed_at);
        if self.switch_count >= self.threshold {
            self.tripped = true;
            warn!(
                switches = self.switch_count,
                threshold = self.threshold,
                "tab switch limit reached"
            );
            Some(GuardSignal::Terminal(event))
        } else {
            info!(
                switches = self.switch_count,
                threshold = self.threshold,
                "tab switch detected"
            );
            Some(GuardSignal::Warning(event))
        }
    }

    /// Record a fullscreen change reported by the host.
    pub fn on_fullscreen_change(&mut self, fullscreen: bool) -> Option<GuardSignal> {
        let was_fullscreen = self.fullscreen;
        self.fullscreen = fullscreen;
        if !self.is_active() || was_fullscreen == fullscreen {
            return None;
        }
        if fullscreen {
            Some(GuardSignal::FullscreenRestored)
        } else {
            info!("fullscreen exited");
            Some(GuardSignal::FullscreenLost)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::Severity;
    use exam_core::time::fixed_now;

    fn switch(guard: &mut EnvironmentGuard) -> Option<GuardSignal> {
        let hidden = guard.on_visibility_change(false, fixed_now());
        guard.on_visibility_change(true, fixed_now());
        hidden
    }

    #[test]
    fn changes_before_start_are_ignored() {
        let mut guard = EnvironmentGuard::new(3);
        assert_eq!(switch(&mut guard), None);
        assert_eq!(guard.on_fullscreen_change(false), None);
        assert_eq!(guard.switch_count(), 0);
    }

    #[test]
    fn third_switch_is_terminal_and_later_ones_are_ignored() {
        let mut guard = EnvironmentGuard::new(3);
        guard.start(true);

        for expected in 1..=2 {
            match switch(&mut guard) {
                Some(GuardSignal::Warning(event)) => {
                    assert_eq!(event.severity(), Severity::Medium);
                    assert_eq!(event.detail().count, Some(expected));
                }
                other => panic!("expected warning, got {other:?}"),
            }
        }
        match switch(&mut guard) {
            Some(GuardSignal::Terminal(event)) => assert_eq!(event.severity(), Severity::High),
            other => panic!("expected terminal, got {other:?}"),
        }

        assert_eq!(switch(&mut guard), None);
        assert_eq!(guard.switch_count(), 3);
        assert!(!guard.is_active());
    }

    #[test]
    fn repeated_hidden_signals_count_once() {
        let mut guard = EnvironmentGuard::new(3);
        guard.start(true);
        assert!(guard.on_visibility_change(false, fixed_now()).is_some());
        assert!(guard.on_visibility_change(false, fixed_now()).is_none());
        assert_eq!(guard.switch_count(), 1);
        assert_eq!(guard.state(), EnvironmentState::Hidden);
    }

    #[test]
    fn fullscreen_exit_prompts_until_restored() {
        let mut guard = EnvironmentGuard::new(3);
        guard.start(true);
        assert_eq!(guard.state(), EnvironmentState::Fullscreen);

        assert_eq!(
            guard.on_fullscreen_change(false),
            Some(GuardSignal::FullscreenLost)
        );
        assert!(guard.needs_fullscreen_prompt());
        assert_eq!(guard.state(), EnvironmentState::Exited);
        assert_eq!(guard.switch_count(), 0);

        assert_eq!(
            guard.on_fullscreen_change(true),
            Some(GuardSignal::FullscreenRestored)
        );
        assert!(!guard.needs_fullscreen_prompt());
    }

    #[test]
    fn failed_initial_fullscreen_still_guards() {
        let mut guard = EnvironmentGuard::new(2);
        guard.start(false);
        assert!(guard.needs_fullscreen_prompt());
        assert!(matches!(switch(&mut guard), Some(GuardSignal::Warning(_))));
    }

    #[test]
    fn stop_silences_the_guard() {
        let mut guard = EnvironmentGuard::new(3);
        guard.start(true);
        guard.stop();
        assert_eq!(switch(&mut guard), None);
        assert_eq!(guard.switch_count(), 0);
    }
}
