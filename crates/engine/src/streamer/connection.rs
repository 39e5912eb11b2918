use serde::Serialize;

/// Lifecycle of the realtime link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts are exhausted. Streaming stays down; the exam goes on.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Reconnect attempt in progress (1-based); zero while connected.
    pub attempt: u32,
    pub last_latency_ms: Option<u64>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            attempt: 0,
            last_latency_ms: None,
        }
    }
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }
}

/// Next step after the link drops or a connect attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reconnect {
    After { attempt: u32 },
    GiveUp,
}

/// Pure transition logic for the link.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionMachine {
    state: ConnectionState,
    max_attempts: u32,
}

impl ConnectionMachine {
    pub(crate) fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::default(),
            max_attempts,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn connecting(&mut self) {
        if self.state.phase == ConnectionPhase::Disconnected {
            self.state.phase = ConnectionPhase::Connecting;
        }
    }

    pub(crate) fn connected(&mut self) {
        self.state.phase = ConnectionPhase::Connected;
        self.state.attempt = 0;
    }

    pub(crate) fn record_latency(&mut self, latency_ms: u64) {
        self.state.last_latency_ms = Some(latency_ms);
    }

    pub(crate) fn failed(&mut self) -> Reconnect {
        let attempt = self.state.attempt + 1;
        if attempt > self.max_attempts {
            self.state.phase = ConnectionPhase::Failed;
            return Reconnect::GiveUp;
        }
        self.state.phase = ConnectionPhase::Reconnecting;
        self.state.attempt = attempt;
        Reconnect::After { attempt }
    }
}
