#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// Failures reported by a [`super::Transport`] implementation.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportError {
    /// The endpoint could not be used to open a connection
    InvalidEndpoint(String),
    /// The backend refused or failed the handshake
    Refused(String),
    /// Error communicating with the WebSocket server
    #[cfg(feature = "ws")]
    WebSocket(tokio_tungstenite::tungstenite::Error),
    /// Error serializing an outbound payload
    Encode(serde_json::Error),
    /// The connection behind the handle is already closed
    Closed,
    /// Any other transport-specific failure
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEndpoint(endpoint) => write!(f, "Invalid endpoint: {endpoint}"),
            Self::Refused(reason) => write!(f, "Connection refused: {reason}"),
            #[cfg(feature = "ws")]
            Self::WebSocket(e) => write!(f, "WebSocket error: {e}"),
            Self::Encode(e) => write!(f, "Failed to encode outbound message: {e}"),
            Self::Closed => write!(f, "Transport connection closed"),
            Self::Other(reason) => write!(f, "Transport error: {reason}"),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            #[cfg(feature = "ws")]
            Self::WebSocket(e) => Some(e),
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<TransportError> for crate::error::Error {
    fn from(e: TransportError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Transport, e)
    }
}

#[cfg(feature = "ws")]
impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encode(e)
    }
}
