//! The transport seam consumed by [`super::TransportConnection`].

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::error::TransportError;
use crate::types::DisconnectReason;

/// Raw occurrence pushed by a transport on an open connection.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Named application message, relayed to listeners unchanged.
    Message { event: String, payload: Value },
    /// The connection behind the handle is gone.
    Closed { reason: DisconnectReason },
}

impl TransportEvent {
    pub fn message<S: Into<String>>(event: S, payload: Value) -> Self {
        Self::Message {
            event: event.into(),
            payload,
        }
    }
}

/// A freshly opened connection.
///
/// `notifications` is the push channel for everything the transport observes
/// on this connection. Dropping its sender is treated as an unexpected
/// transport error.
#[non_exhaustive]
#[derive(Debug)]
pub struct Opened<H> {
    pub handle: H,
    pub session_id: String,
    pub notifications: mpsc::UnboundedReceiver<TransportEvent>,
}

impl<H> Opened<H> {
    /// Wrap a handle with a random session id.
    #[must_use]
    pub fn new(handle: H, notifications: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self {
            handle,
            session_id: uuid::Uuid::new_v4().to_string(),
            notifications,
        }
    }

    /// Use a session id assigned by the backend instead of a random one.
    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = session_id.into();
        self
    }
}

/// Bidirectional message channel to the backend.
///
/// Implementations only move frames; reconnection, status tracking and
/// queueing live in the connection. Any socket or long-poll client that can
/// satisfy these three operations may be plugged in.
///
/// # Example
///
/// ```ignore
/// struct Loopback;
///
/// #[async_trait]
/// impl Transport for Loopback {
///     type Handle = mpsc::UnboundedSender<TransportEvent>;
///
///     async fn open(&self, _endpoint: &str) -> Result<Opened<Self::Handle>, TransportError> {
///         let (tx, rx) = mpsc::unbounded_channel();
///         Ok(Opened::new(tx, rx))
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Per-connection state needed by `send` and `close`.
    type Handle: Send + Sync + 'static;

    /// Perform the handshake with `endpoint`.
    async fn open(&self, endpoint: &str) -> Result<Opened<Self::Handle>, TransportError>;

    /// Close the connection deliberately.
    async fn close(&self, handle: &Self::Handle) -> Result<(), TransportError>;

    /// Emit one named message.
    async fn send(
        &self,
        handle: &Self::Handle,
        event: &str,
        payload: &Value,
    ) -> Result<(), TransportError>;
}
