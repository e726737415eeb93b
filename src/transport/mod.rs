//! Connection management on top of a pluggable transport.
//!
//! A [`TransportConnection`] owns one logical connection to the assistant
//! backend. It tracks status through the [reducer](crate::reducer),
//! reconnects with exponential backoff after unexpected drops, queues
//! outbound actions while the link is down and replays them in order once it
//! is back.
//!
//! # Architecture
//!
//! - [`Transport`]: Trait for the wire layer (open, close, send, push notifications)
//! - [`TransportConnection`]: Cloneable handle to the task that drives a transport
//! - [`WeakTransportConnection`]: Handle for listeners that does not keep the task alive
//! - [`ConnectOptions`]: Reconnection, timeout and queue settings
//! - [`websocket::WebSocketTransport`]: JSON-over-WebSocket transport (`ws` feature)
//!
//! # Example
//!
//! ```ignore
//! let options = ConnectOptions::builder()
//!     .max_reconnect_attempts(ReconnectLimit::Attempts(3))
//!     .build();
//! let connection = TransportConnection::new(WebSocketTransport::default(), options)?;
//!
//! let log = handler(|change: &StatusChange| println!("{} -> {}", change.previous, change.current));
//! let _status = connection.on_status_change(&log);
//!
//! connection.connect("ws://localhost:8765").await?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod traits;
#[cfg(feature = "ws")]
pub mod websocket;

pub use config::{ConnectOptions, ReconnectLimit};
#[expect(
    clippy::module_name_repetitions,
    reason = "TransportConnection includes module name for clarity when used outside this module"
)]
pub use connection::{TransportConnection, WeakTransportConnection};
#[expect(
    clippy::module_name_repetitions,
    reason = "TransportError includes module name for clarity when used outside this module"
)]
pub use error::TransportError;
pub use traits::*;
