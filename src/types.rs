//! Connection status and lifecycle vocabulary shared by the reducer, the
//! registry and the transport connection.

use std::time::Duration;

use serde::Serialize;

/// Date and time types for pending-action timestamps.
pub use chrono::{DateTime, Utc};
/// Payload type carried by inbound and outbound application messages.
pub use serde_json::Value;

/// User-facing connection status. Exactly one value is active at a time and
/// only [`crate::reducer::reduce`] moves between them.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// `true` while a connection is established or being established.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }
}

/// Why a live connection went away.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The application called `disconnect()`. Never followed by a reconnect.
    ClientInitiated,
    /// The backend closed the connection.
    ServerClosed { detail: Option<String> },
    /// The transport failed underneath a live connection.
    TransportError { detail: String },
}

impl DisconnectReason {
    #[must_use]
    pub fn server_closed(detail: Option<String>) -> Self {
        Self::ServerClosed { detail }
    }

    pub fn transport_error<S: Into<String>>(detail: S) -> Self {
        Self::TransportError {
            detail: detail.into(),
        }
    }

    #[must_use]
    pub const fn is_client_initiated(&self) -> bool {
        matches!(self, Self::ClientInitiated)
    }
}

/// Why an initial connection attempt did not reach `Connected`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectFailure {
    /// The handshake did not finish within `connect_timeout`.
    Timeout { after: Duration },
    /// The transport refused or failed the handshake.
    Transport { message: String },
}

/// Why the reconnect loop gave up.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectFailure {
    /// `max_reconnect_attempts` attempts were made without success.
    Exhausted { attempts: u32 },
    /// Reconnection is turned off in the connection options.
    Disabled,
}

/// Normalized connection lifecycle occurrence, produced by the transport
/// connection and consumed once by the reducer.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    ConnectStarted,
    Connected { session_id: String },
    Disconnected { reason: DisconnectReason },
    ConnectError { cause: ConnectFailure },
    ReconnectAttempt { attempt: u32, delay: Duration },
    ReconnectSucceeded { attempt: u32 },
    ReconnectFailed { cause: ReconnectFailure },
}

impl LifecycleEvent {
    /// Stable snake-case name, used in log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConnectStarted => "connect_started",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::ConnectError { .. } => "connect_error",
            Self::ReconnectAttempt { .. } => "reconnect_attempt",
            Self::ReconnectSucceeded { .. } => "reconnect_succeeded",
            Self::ReconnectFailed { .. } => "reconnect_failed",
        }
    }
}

/// A status transition that actually changed the status.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub previous: ConnectionStatus,
    pub current: ConnectionStatus,
}

impl StatusChange {
    #[must_use]
    pub const fn new(previous: ConnectionStatus, current: ConnectionStatus) -> Self {
        Self { previous, current }
    }
}
