//! JSON-over-WebSocket [`Transport`].
//!
//! Every frame is a JSON envelope `{"event": <name>, "data": <payload>}`.
//! The backend may batch several envelopes into one frame as a JSON array.
//! A WebSocket ping is sent every [`Config::heartbeat_interval`]; if no pong
//! arrives within [`Config::heartbeat_timeout`] the session is reported as
//! closed.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::error::TransportError;
use super::traits::{Opened, Transport, TransportEvent};
use crate::types::DisconnectReason;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(15);

/// Configuration for the WebSocket transport.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval for sending PING frames to keep the connection alive
    pub heartbeat_interval: Duration,
    /// Maximum time to wait for a PONG before considering the connection dead
    pub heartbeat_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT_DURATION,
        }
    }
}

/// [`Transport`] speaking JSON envelopes over `ws://` or `wss://`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: Config,
}

impl WebSocketTransport {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

/// Writer side of one open WebSocket session.
///
/// Dropping the handle closes the socket.
#[derive(Debug)]
pub struct WebSocketHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug, Serialize)]
struct OutboundEnvelope<'msg> {
    event: &'msg str,
    data: &'msg Value,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Frame {
    Batch(Vec<Envelope>),
    Single(Envelope),
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Handle = WebSocketHandle;

    async fn open(&self, endpoint: &str) -> Result<Opened<WebSocketHandle>, TransportError> {
        let url = parse_endpoint(endpoint)?;
        let (ws_stream, _response) = connect_async(url.as_str()).await?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();

        let config = self.config.clone();
        tokio::spawn(async move {
            handle_connection(ws_stream, outbound_rx, notifications_tx, config).await;
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, "WebSocket connection established");

        let handle = WebSocketHandle {
            outbound: outbound_tx,
        };
        Ok(Opened::new(handle, notifications_rx))
    }

    async fn close(&self, handle: &WebSocketHandle) -> Result<(), TransportError> {
        // Already gone if the writer has stopped
        _ = handle.outbound.send(Outbound::Close);
        Ok(())
    }

    async fn send(
        &self,
        handle: &WebSocketHandle,
        event: &str,
        payload: &Value,
    ) -> Result<(), TransportError> {
        let text = encode_frame(event, payload)?;
        handle
            .outbound
            .send(Outbound::Text(text))
            .map_err(|_e| TransportError::Closed)
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, TransportError> {
    let url = Url::parse(endpoint)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(TransportError::InvalidEndpoint(format!(
            "{endpoint}: unsupported scheme `{scheme}`"
        ))),
    }
}

fn encode_frame(event: &str, payload: &Value) -> Result<String, TransportError> {
    let envelope = OutboundEnvelope {
        event,
        data: payload,
    };
    Ok(serde_json::to_string(&envelope)?)
}

fn parse_frame(text: &str) -> Result<Vec<Envelope>, serde_json::Error> {
    Ok(match serde_json::from_str(text)? {
        Frame::Batch(envelopes) => envelopes,
        Frame::Single(envelope) => vec![envelope],
    })
}

/// Pump one WebSocket session until either side closes it.
async fn handle_connection(
    ws_stream: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    notifications_tx: mpsc::UnboundedSender<TransportEvent>,
    config: Config,
) {
    let (mut write, mut read) = ws_stream.split();

    // Channel to notify heartbeat loop when PONG is received
    let (pong_tx, pong_rx) = watch::channel(Instant::now());
    let (ping_tx, mut ping_rx) = mpsc::unbounded_channel();

    let mut heartbeat = tokio::spawn(async move {
        heartbeat_loop(ping_tx, &config, pong_rx).await;
    });

    let reason = loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => relay(&text, &notifications_tx),
                Some(Ok(Message::Pong(_))) => {
                    _ = pong_tx.send(Instant::now());
                }
                Some(Ok(Message::Close(frame))) => {
                    let detail = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty());
                    break Some(DisconnectReason::server_closed(detail));
                }
                Some(Ok(_)) => {
                    // Binary frames are not part of the protocol; pings are answered by tungstenite
                }
                Some(Err(e)) => break Some(DisconnectReason::transport_error(e.to_string())),
                None => break Some(DisconnectReason::server_closed(None)),
            },

            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        break Some(DisconnectReason::transport_error(e.to_string()));
                    }
                }
                Some(Outbound::Close) | None => {
                    _ = write.close().await;
                    break None;
                }
            },

            Some(()) = ping_rx.recv() => {
                if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                    break Some(DisconnectReason::transport_error(e.to_string()));
                }
            }

            _ = &mut heartbeat => {
                break Some(DisconnectReason::transport_error("heartbeat timeout"));
            }
        }
    };

    heartbeat.abort();

    if let Some(reason) = reason {
        #[cfg(feature = "tracing")]
        tracing::debug!(?reason, "WebSocket connection closed");
        _ = notifications_tx.send(TransportEvent::Closed { reason });
    }
}

fn relay(text: &str, notifications: &mpsc::UnboundedSender<TransportEvent>) {
    match parse_frame(text) {
        Ok(envelopes) => {
            for Envelope { event, data } in envelopes {
                _ = notifications.send(TransportEvent::message(event, data));
            }
        }
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(%text, error = %e, "Skipping unparseable WebSocket frame");
            #[cfg(not(feature = "tracing"))]
            let _ = (text, &e);
        }
    }
}

/// Sends PING requests and returns once a PONG fails to arrive in time.
async fn heartbeat_loop(
    ping_tx: mpsc::UnboundedSender<()>,
    config: &Config,
    mut pong_rx: watch::Receiver<Instant>,
) {
    let mut ping_interval = interval(config.heartbeat_interval);
    // The first tick completes immediately
    ping_interval.tick().await;

    loop {
        ping_interval.tick().await;

        // Mark current PONG state as seen so a stale PONG is not mistaken for a reply
        drop(pong_rx.borrow_and_update());

        let ping_sent = Instant::now();
        if ping_tx.send(()).is_err() {
            break;
        }

        match timeout(config.heartbeat_timeout, pong_rx.changed()).await {
            Ok(Ok(())) => {
                let last_pong = *pong_rx.borrow_and_update();
                if last_pong < ping_sent {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("PONG older than last PING, connection may be stale");
                    break;
                }
            }
            Ok(Err(_)) => break,
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Heartbeat timeout: no PONG received within {:?}",
                    config.heartbeat_timeout
                );
                break;
            }
        }
    }
}
