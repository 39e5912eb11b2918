use async_trait::async_trait;
use exam_core::model::SessionMeta;
use tokio::sync::mpsc;

use super::message::{FrameMessage, HealthPing, HealthPong};
use crate::error::TransportError;

/// Inbound traffic on an established link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    HealthCheck(HealthPing),
    Disconnected { reason: String },
}

/// A bidirectional realtime link to the monitoring side.
///
/// Dropping the receiver returned from `connect` is equivalent to a disconnect
/// notification.
#[async_trait]
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Returns `TransportError::Connect` when the link cannot be opened.
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError>;

    async fn disconnect(&self);

    /// Announce the session. Must be safe to repeat after every reconnect.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` when the message cannot be sent.
    async fn join(&self, meta: &SessionMeta) -> Result<(), TransportError>;

    /// # Errors
    ///
    /// Returns `TransportError` when the message cannot be sent.
    async fn leave(&self, meta: &SessionMeta) -> Result<(), TransportError>;

    /// # Errors
    ///
    /// Returns `TransportError` when the frame cannot be sent.
    async fn send_frame(&self, message: &FrameMessage) -> Result<(), TransportError>;

    /// # Errors
    ///
    /// Returns `TransportError` when the reply cannot be sent.
    async fn send_pong(&self, pong: &HealthPong) -> Result<(), TransportError>;
}
