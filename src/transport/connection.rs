#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use chrono::Utc;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Sleep, sleep, timeout};

use super::config::ConnectOptions;
use super::traits::{Opened, Transport, TransportEvent};
use crate::Result;
use crate::error::Error;
use crate::queue::{PendingAction, PendingQueue, SendOutcome};
use crate::reducer;
use crate::registry::{Handler, ListenerRegistry, Subscription};
use crate::types::{
    ConnectFailure, ConnectionStatus, DisconnectReason, LifecycleEvent, ReconnectFailure,
    StatusChange,
};

/// Registry key for lifecycle listeners.
const LIFECYCLE_EVENT: &str = "lifecycle";
/// Registry key for status-change listeners.
const STATUS_EVENT: &str = "status";

enum Command {
    Connect {
        endpoint: String,
        options: Option<ConnectOptions>,
        reply: oneshot::Sender<ConnectionStatus>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        event: String,
        payload: Value,
        reply: oneshot::Sender<SendOutcome>,
    },
    PendingActions {
        reply: oneshot::Sender<usize>,
    },
    ClearQueue {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

#[derive(Clone, Default)]
struct Listeners {
    lifecycle: ListenerRegistry<LifecycleEvent>,
    status: ListenerRegistry<StatusChange>,
    messages: ListenerRegistry<Value>,
}

/// One logical connection to the assistant backend.
///
/// The handle is cheap to clone; every clone talks to the same background
/// task, which owns the transport, the status and the pending queue. That
/// task performs every status transition and every listener call, so
/// listeners observe lifecycle events in exactly the order the transport
/// produced them.
///
/// Transport failures are never returned from [`connect`](Self::connect) or
/// [`send`](Self::send); they surface only as lifecycle events and status
/// changes. Methods return `Err` only once the background task has stopped.
///
/// # Example
///
/// ```ignore
/// let connection = TransportConnection::new(WebSocketTransport::default(), ConnectOptions::default())?;
///
/// let on_reply = handler(|payload: &Value| println!("{payload}"));
/// let replies = connection.on_message("chat_response", &on_reply);
///
/// connection.connect("ws://localhost:8765").await?;
/// connection.send_json("chat_message", &ChatMessage::new("hello")).await?;
///
/// replies.unsubscribe();
/// connection.disconnect().await?;
/// ```
#[derive(Clone)]
pub struct TransportConnection {
    commands: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    listeners: Listeners,
}

impl fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConnection")
            .field("status", &self.status())
            .field("closed", &self.commands.is_closed())
            .finish_non_exhaustive()
    }
}

impl TransportConnection {
    /// Validate `options` and start the background task driving `transport`.
    ///
    /// No connection is opened until [`connect`](Self::connect) is called.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new<T: Transport>(transport: T, options: ConnectOptions) -> Result<Self> {
        options.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let listeners = Listeners::default();

        let actor = Actor::new(
            transport,
            options,
            commands_rx,
            status_tx,
            listeners.clone(),
        );
        tokio::spawn(actor.run());

        Ok(Self {
            commands: commands_tx,
            status_rx,
            listeners,
        })
    }

    /// Start connecting to `endpoint`.
    ///
    /// Idempotent: while connecting, connected or reconnecting this returns
    /// the current status without opening anything. From `Disconnected` or
    /// `Error` it starts a fresh attempt with a new epoch and a reset
    /// attempt counter, and returns `Connecting`. The outcome is reported
    /// through lifecycle events.
    pub async fn connect(&self, endpoint: &str) -> Result<ConnectionStatus> {
        self.request(|reply| Command::Connect {
            endpoint: endpoint.to_owned(),
            options: None,
            reply,
        })
        .await
    }

    /// [`connect`](Self::connect) with new options.
    ///
    /// The options replace the current ones only when a fresh attempt starts;
    /// while already active they are ignored along with the call. Invalid
    /// options are rejected with `Kind::Validation` before anything changes.
    pub async fn connect_with(
        &self,
        endpoint: &str,
        options: ConnectOptions,
    ) -> Result<ConnectionStatus> {
        options.validate()?;
        self.request(|reply| Command::Connect {
            endpoint: endpoint.to_owned(),
            options: Some(options),
            reply,
        })
        .await
    }

    /// Close the connection deliberately.
    ///
    /// Cancels any pending reconnect, abandons an in-flight attempt and never
    /// triggers reconnection. Resolves once the status is `Disconnected`.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Emit `event` with `payload`, or queue it until the connection is back.
    pub async fn send(&self, event: &str, payload: Value) -> Result<SendOutcome> {
        self.request(|reply| Command::Send {
            event: event.to_owned(),
            payload,
            reply,
        })
        .await
    }

    /// Serialize `payload` and [`send`](Self::send) it.
    pub async fn send_json<R: Serialize>(&self, event: &str, payload: &R) -> Result<SendOutcome> {
        let payload = serde_json::to_value(payload)?;
        self.send(event, payload).await
    }

    /// Number of actions waiting for the connection.
    pub async fn pending_actions(&self) -> Result<usize> {
        self.request(|reply| Command::PendingActions { reply })
            .await
    }

    /// Discard every pending action, returning how many were dropped.
    pub async fn clear_queue(&self) -> Result<usize> {
        self.request(|reply| Command::ClearQueue { reply }).await
    }

    /// Current reducer-confirmed status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes through a watch channel.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Stream of statuses set after this call. Consecutive transitions that
    /// happen before the stream is polled are coalesced into the latest one;
    /// use [`on_status_change`](Self::on_status_change) to observe every
    /// transition.
    pub fn status_stream(&self) -> impl Stream<Item = ConnectionStatus> + use<> {
        let mut status_rx = self.status_rx.clone();
        status_rx.mark_unchanged();

        stream! {
            while status_rx.changed().await.is_ok() {
                let status = *status_rx.borrow_and_update();
                yield status;
            }
        }
    }

    /// Listen to every lifecycle event, including ones that do not change
    /// the status (such as `ReconnectAttempt` while reconnecting).
    ///
    /// A handler that needs the connection should capture
    /// [`downgrade`](Self::downgrade), not a clone of `self`.
    pub fn on_lifecycle(&self, handler: &Handler<LifecycleEvent>) -> Subscription {
        self.listeners.lifecycle.on(LIFECYCLE_EVENT, handler)
    }

    /// Listen to status transitions. No-op transitions are not reported.
    ///
    /// As with [`on_lifecycle`](Self::on_lifecycle), capture a
    /// [`WeakTransportConnection`] rather than a strong clone.
    pub fn on_status_change(&self, handler: &Handler<StatusChange>) -> Subscription {
        self.listeners.status.on(STATUS_EVENT, handler)
    }

    /// Listen to inbound application messages named `event`.
    pub fn on_message(&self, event: &str, handler: &Handler<Value>) -> Subscription {
        self.listeners.messages.on(event, handler)
    }

    /// Stop the background task. The live connection, if any, is closed and a
    /// final `Disconnected` transition is emitted before all listeners are
    /// cleared.
    pub fn shutdown(&self) {
        _ = self.commands.send(Command::Shutdown);
    }

    /// `true` once the background task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// A handle that does not keep the background task alive.
    ///
    /// Listeners are owned by the background task, so a listener that
    /// captures a `TransportConnection` clone keeps the task running after
    /// every other handle is gone. Capture a [`WeakTransportConnection`]
    /// there instead.
    #[must_use]
    pub fn downgrade(&self) -> WeakTransportConnection {
        WeakTransportConnection {
            commands: self.commands.downgrade(),
            status_rx: self.status_rx.clone(),
            listeners: self.listeners.clone(),
        }
    }

    async fn request<R, F>(&self, command: F) -> Result<R>
    where
        F: FnOnce(oneshot::Sender<R>) -> Command,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .map_err(|_e| Error::closed())?;
        reply_rx.await.map_err(|_e| Error::closed())
    }
}

/// Non-owning counterpart of [`TransportConnection`].
///
/// Once every strong handle is dropped the background task stops, closes
/// the live connection and [`upgrade`](Self::upgrade) returns `None`.
#[derive(Clone)]
pub struct WeakTransportConnection {
    commands: mpsc::WeakUnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    listeners: Listeners,
}

impl fmt::Debug for WeakTransportConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTransportConnection")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl WeakTransportConnection {
    /// A strong handle, or `None` if the background task has stopped or
    /// every strong handle is gone.
    #[must_use]
    pub fn upgrade(&self) -> Option<TransportConnection> {
        let commands = self.commands.upgrade()?;
        (!commands.is_closed()).then(|| TransportConnection {
            commands,
            status_rx: self.status_rx.clone(),
            listeners: self.listeners.clone(),
        })
    }

    /// Last status published by the background task.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }
}

#[derive(Debug, Clone, Copy)]
enum Attempt {
    Initial,
    Reconnect(u32),
}

struct OpenCompletion<H> {
    epoch: u64,
    result: std::result::Result<Opened<H>, ConnectFailure>,
}

struct Session<H> {
    handle: H,
    notifications: mpsc::UnboundedReceiver<TransportEvent>,
}

struct Retry {
    timer: Pin<Box<Sleep>>,
    delay: Duration,
}

/// Background task owning all connection state.
struct Actor<T: Transport> {
    transport: Arc<T>,
    options: ConnectOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
    listeners: Listeners,
    queue: PendingQueue,
    /// Incremented by every `connect()` and `disconnect()`; completions
    /// tagged with an older epoch are discarded.
    epoch: u64,
    endpoint: Option<String>,
    opening: Option<Attempt>,
    session: Option<Session<T::Handle>>,
    attempts: u32,
    backoff: ExponentialBackoff,
    retry: Option<Retry>,
    completions_tx: mpsc::UnboundedSender<OpenCompletion<T::Handle>>,
    completions_rx: mpsc::UnboundedReceiver<OpenCompletion<T::Handle>>,
}

impl<T: Transport> Actor<T> {
    fn new(
        transport: T,
        options: ConnectOptions,
        commands: mpsc::UnboundedReceiver<Command>,
        status_tx: watch::Sender<ConnectionStatus>,
        listeners: Listeners,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Self {
            transport: Arc::new(transport),
            queue: PendingQueue::new(options.max_queue_len, options.max_queue_age),
            backoff: options.backoff(),
            options,
            commands,
            status_tx,
            listeners,
            epoch: 0,
            endpoint: None,
            opening: None,
            session: None,
            attempts: 0,
            retry: None,
            completions_tx,
            completions_rx,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },

                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion).await;
                }

                notification = next_notification(self.session.as_mut()) => {
                    self.handle_notification(notification);
                }

                () = retry_elapsed(self.retry.as_mut()) => {
                    self.start_reconnect_attempt();
                }
            }
        }

        self.teardown().await;
    }

    fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                endpoint,
                options,
                reply,
            } => {
                let status = self.connect(endpoint, options);
                _ = reply.send(status);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                _ = reply.send(());
            }
            Command::Send {
                event,
                payload,
                reply,
            } => {
                let outcome = self.send(event, payload).await;
                _ = reply.send(outcome);
            }
            Command::PendingActions { reply } => {
                _ = reply.send(self.queue.len());
            }
            Command::ClearQueue { reply } => {
                _ = reply.send(self.queue.clear());
            }
            Command::Shutdown => {}
        }
    }

    fn connect(&mut self, endpoint: String, options: Option<ConnectOptions>) -> ConnectionStatus {
        let status = self.status();
        if status.is_active() {
            #[cfg(feature = "tracing")]
            tracing::debug!(%status, %endpoint, "Connect requested while active, keeping current connection");
            return status;
        }

        if let Some(options) = options {
            self.queue
                .set_limits(options.max_queue_len, options.max_queue_age);
            self.backoff = options.backoff();
            self.options = options;
        }

        self.epoch += 1;
        self.attempts = 0;
        self.backoff.reset();
        self.retry = None;
        self.endpoint = Some(endpoint);

        self.apply(LifecycleEvent::ConnectStarted);
        self.spawn_open(Attempt::Initial);
        self.status()
    }

    async fn disconnect(&mut self) {
        self.epoch += 1;
        self.opening = None;
        self.retry = None;
        self.attempts = 0;

        if let Some(session) = self.session.take() {
            close_handle(self.transport.as_ref(), &session.handle).await;
        }

        if self.status() != ConnectionStatus::Disconnected {
            self.apply(LifecycleEvent::Disconnected {
                reason: DisconnectReason::ClientInitiated,
            });
        }
    }

    async fn send(&mut self, event: String, payload: Value) -> SendOutcome {
        if self.status().is_connected() {
            // Anything still queued goes first to keep FIFO order.
            self.flush().await;

            if self.queue.is_empty()
                && let Some(session) = &self.session
            {
                match self.transport.send(&session.handle, &event, &payload).await {
                    Ok(()) => return SendOutcome::Delivered,
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%event, error = %e, "Send failed while connected, queueing");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }
                }
            }
        }

        let now = Utc::now();
        self.queue.push(PendingAction::new(event, payload, now), now)
    }

    /// Replay pending actions in FIFO order. Stops at the first failure and
    /// leaves the failed action at the head of the queue.
    async fn flush(&mut self) {
        let Some(session) = &self.session else {
            return;
        };

        self.queue.expire(Utc::now());

        let mut flushed = 0_usize;
        while let Some(action) = self.queue.pop_front() {
            if let Err(e) = self
                .transport
                .send(&session.handle, &action.event, &action.payload)
                .await
            {
                #[cfg(feature = "tracing")]
                tracing::warn!(event = %action.event, error = %e, "Replay of pending action failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                self.queue.push_front(action);
                break;
            }
            flushed += 1;
        }

        #[cfg(feature = "tracing")]
        if flushed > 0 {
            tracing::debug!(flushed, remaining = self.queue.len(), "Replayed pending actions");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = flushed;
    }

    fn spawn_open(&mut self, attempt: Attempt) {
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };

        self.opening = Some(attempt);

        let epoch = self.epoch;
        let transport = Arc::clone(&self.transport);
        let completions = self.completions_tx.clone();
        let connect_timeout = self.options.connect_timeout;

        tokio::spawn(async move {
            let result = match timeout(connect_timeout, transport.open(&endpoint)).await {
                Ok(Ok(opened)) => Ok(opened),
                Ok(Err(e)) => Err(ConnectFailure::Transport {
                    message: e.to_string(),
                }),
                Err(_elapsed) => Err(ConnectFailure::Timeout {
                    after: connect_timeout,
                }),
            };
            _ = completions.send(OpenCompletion { epoch, result });
        });
    }

    async fn handle_completion(&mut self, completion: OpenCompletion<T::Handle>) {
        let OpenCompletion { epoch, result } = completion;

        let attempt = if epoch == self.epoch {
            self.opening.take()
        } else {
            None
        };

        let Some(attempt) = attempt else {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                epoch,
                current = self.epoch,
                "Discarding completion of abandoned connection attempt"
            );
            if let Ok(opened) = result {
                close_handle(self.transport.as_ref(), &opened.handle).await;
            }
            return;
        };

        match result {
            Ok(opened) => {
                let Opened {
                    handle,
                    session_id,
                    notifications,
                } = opened;

                self.session = Some(Session {
                    handle,
                    notifications,
                });
                self.attempts = 0;
                self.backoff.reset();

                let event = match attempt {
                    Attempt::Initial => LifecycleEvent::Connected { session_id },
                    Attempt::Reconnect(attempt) => {
                        #[cfg(feature = "tracing")]
                        tracing::info!(attempt, %session_id, "Reconnected");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &session_id;
                        LifecycleEvent::ReconnectSucceeded { attempt }
                    }
                };
                self.apply(event);
                self.flush().await;
            }
            Err(cause) => {
                match attempt {
                    Attempt::Initial => self.apply(LifecycleEvent::ConnectError { cause }),
                    Attempt::Reconnect(attempt) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(attempt, ?cause, "Reconnection attempt failed");
                        #[cfg(not(feature = "tracing"))]
                        let _ = (attempt, &cause);
                    }
                }
                self.schedule_reconnect();
            }
        }
    }

    fn handle_notification(&mut self, notification: Option<TransportEvent>) {
        match notification {
            Some(TransportEvent::Message { event, payload }) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(%event, "Relaying inbound message");
                self.listeners.messages.emit(&event, &payload);
            }
            Some(TransportEvent::Closed { reason }) => self.connection_lost(reason),
            None => self.connection_lost(DisconnectReason::transport_error(
                "transport notification channel closed",
            )),
        }
    }

    fn connection_lost(&mut self, reason: DisconnectReason) {
        self.session = None;

        let client_initiated = reason.is_client_initiated();
        self.apply(LifecycleEvent::Disconnected { reason });

        if !client_initiated {
            self.schedule_reconnect();
        }
    }

    /// Arm the retry timer, or give up when reconnection is disabled or the
    /// attempt budget is spent.
    fn schedule_reconnect(&mut self) {
        if !self.options.reconnection {
            self.give_up(ReconnectFailure::Disabled);
            return;
        }

        if self
            .options
            .max_reconnect_attempts
            .is_exhausted(self.attempts)
        {
            self.give_up(ReconnectFailure::Exhausted {
                attempts: self.attempts,
            });
            return;
        }

        let Some(delay) = self.backoff.next_backoff() else {
            self.give_up(ReconnectFailure::Exhausted {
                attempts: self.attempts,
            });
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            attempt = self.attempts + 1,
            delay_ms = delay.as_millis(),
            "Scheduling reconnection attempt"
        );

        self.retry = Some(Retry {
            timer: Box::pin(sleep(delay)),
            delay,
        });
    }

    /// `ReconnectFailed` only exists while a reconnect loop is running; a
    /// failed initial connect simply stays in `Error`.
    fn give_up(&mut self, cause: ReconnectFailure) {
        if self.status() == ConnectionStatus::Reconnecting {
            #[cfg(feature = "tracing")]
            tracing::error!(?cause, "Giving up on reconnection");
            self.apply(LifecycleEvent::ReconnectFailed { cause });
        }
    }

    fn start_reconnect_attempt(&mut self) {
        let Some(retry) = self.retry.take() else {
            return;
        };

        self.attempts = self.attempts.saturating_add(1);
        self.apply(LifecycleEvent::ReconnectAttempt {
            attempt: self.attempts,
            delay: retry.delay,
        });
        self.spawn_open(Attempt::Reconnect(self.attempts));
    }

    /// Run `event` through the reducer, publish the new status, then notify
    /// lifecycle listeners and, if the status changed, status listeners.
    fn apply(&mut self, event: LifecycleEvent) {
        let previous = self.status();

        let next = match reducer::reduce(previous, &event) {
            Ok(next) => next,
            Err(violation) => {
                assert!(
                    !self.options.strict_invariants,
                    "connection state invariant violated: {violation}"
                );
                #[cfg(feature = "tracing")]
                tracing::error!(error = %violation, "Ignoring lifecycle event with no transition");
                return;
            }
        };

        self.status_tx.send_replace(next);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            event = event.name(),
            %previous,
            status = %next,
            epoch = self.epoch,
            "Applied lifecycle event"
        );

        self.listeners.lifecycle.emit(LIFECYCLE_EVENT, &event);
        if next != previous {
            self.listeners
                .status
                .emit(STATUS_EVENT, &StatusChange::new(previous, next));
        }
    }

    async fn teardown(&mut self) {
        self.retry = None;
        self.opening = None;

        if let Some(session) = self.session.take() {
            close_handle(self.transport.as_ref(), &session.handle).await;
        }

        if self.status() != ConnectionStatus::Disconnected {
            self.apply(LifecycleEvent::Disconnected {
                reason: DisconnectReason::ClientInitiated,
            });
        }

        self.listeners.lifecycle.clear(None);
        self.listeners.status.clear(None);
        self.listeners.messages.clear(None);

        #[cfg(feature = "tracing")]
        tracing::debug!(pending = self.queue.len(), "Connection task stopped");
    }
}

async fn close_handle<T: Transport>(transport: &T, handle: &T::Handle) {
    if let Err(e) = transport.close(handle).await {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %e, "Failed to close transport handle");
        #[cfg(not(feature = "tracing"))]
        let _ = &e;
    }
}

async fn next_notification<H>(session: Option<&mut Session<H>>) -> Option<TransportEvent> {
    match session {
        Some(session) => session.notifications.recv().await,
        None => pending().await,
    }
}

async fn retry_elapsed(retry: Option<&mut Retry>) {
    match retry {
        Some(retry) => retry.timer.as_mut().await,
        None => pending().await,
    }
}
