#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each integration test uses a different subset of these helpers"
)]

use std::collections::VecDeque;
use std::future::pending;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assistant_link::registry::{Handler, handler};
use assistant_link::transport::{Opened, Transport, TransportError, TransportEvent};
use assistant_link::types::{DisconnectReason, Value};
use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tokio::time::{sleep, timeout};

/// Upper bound for any awaited condition. Tests run on paused time, so this
/// only trips when the condition can never become true.
pub const WAIT: Duration = Duration::from_secs(600);

pub const ENDPOINT: &str = "stub://assistant";

/// What the next `open` call does.
#[derive(Debug, Clone)]
pub enum Open {
    Accept,
    Refuse,
    /// Accept once the notify is triggered.
    Gate(Arc<Notify>),
    /// Never complete.
    Hang,
}

#[derive(Debug)]
struct StubState {
    script: VecDeque<Open>,
    fallback: Open,
    open_calls: usize,
    sessions: Vec<mpsc::UnboundedSender<TransportEvent>>,
    sent: Vec<(u64, String, Value)>,
    closed: Vec<u64>,
    fail_sends: bool,
}

/// In-memory transport whose behaviour is scripted per `open` call.
///
/// Handles are session indexes, starting at 0 for the first accepted open.
#[derive(Debug, Clone)]
pub struct StubTransport {
    state: Arc<Mutex<StubState>>,
}

impl StubTransport {
    /// Every `open` not covered by [`Self::script`] is answered with `fallback`.
    pub fn new(fallback: Open) -> Self {
        Self {
            state: Arc::new(Mutex::new(StubState {
                script: VecDeque::new(),
                fallback,
                open_calls: 0,
                sessions: Vec::new(),
                sent: Vec::new(),
                closed: Vec::new(),
                fail_sends: false,
            })),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Open::Accept)
    }

    pub fn refusing() -> Self {
        Self::new(Open::Refuse)
    }

    pub fn script<I: IntoIterator<Item = Open>>(self, outcomes: I) -> Self {
        self.state.lock().unwrap().script.extend(outcomes);
        self
    }

    pub fn open_calls(&self) -> usize {
        self.state.lock().unwrap().open_calls
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    /// Frames sent through the transport, in order.
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(_, event, payload)| (event.clone(), payload.clone()))
            .collect()
    }

    pub fn sent_events(&self) -> Vec<String> {
        self.sent().into_iter().map(|(event, _)| event).collect()
    }

    pub fn closed(&self) -> Vec<u64> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Deliver an inbound message on `session`.
    pub fn push(&self, session: u64, event: &str, payload: Value) {
        let state = self.state.lock().unwrap();
        state.sessions[session as usize]
            .send(TransportEvent::message(event, payload))
            .unwrap();
    }

    /// Simulate the backend dropping `session`.
    pub fn drop_session(&self, session: u64) {
        let state = self.state.lock().unwrap();
        state.sessions[session as usize]
            .send(TransportEvent::Closed {
                reason: DisconnectReason::server_closed(Some("backend restarted".to_owned())),
            })
            .unwrap();
    }
}

#[async_trait]
impl Transport for StubTransport {
    type Handle = u64;

    async fn open(&self, endpoint: &str) -> Result<Opened<u64>, TransportError> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.open_calls += 1;
            match state.script.pop_front() {
                Some(outcome) => outcome,
                None => state.fallback.clone(),
            }
        };

        match outcome {
            Open::Accept => {}
            Open::Refuse => {
                return Err(TransportError::Refused(format!("{endpoint} unreachable")));
            }
            Open::Gate(gate) => gate.notified().await,
            Open::Hang => pending::<()>().await,
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session = {
            let mut state = self.state.lock().unwrap();
            state.sessions.push(tx);
            (state.sessions.len() - 1) as u64
        };

        Ok(Opened::new(session, rx).with_session_id(format!("stub-{session}")))
    }

    async fn close(&self, handle: &u64) -> Result<(), TransportError> {
        self.state.lock().unwrap().closed.push(*handle);
        Ok(())
    }

    async fn send(&self, handle: &u64, event: &str, payload: &Value) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(TransportError::Closed);
        }
        state.sent.push((*handle, event.to_owned(), payload.clone()));
        Ok(())
    }
}

/// Collects every payload a listener receives.
#[derive(Debug)]
pub struct Recorder<P> {
    events: Arc<Mutex<Vec<P>>>,
    changed: Arc<Notify>,
}

impl<P> Clone for Recorder<P> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            changed: Arc::clone(&self.changed),
        }
    }
}

impl<P: Clone + Send + Sync + 'static> Recorder<P> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            changed: Arc::new(Notify::new()),
        }
    }

    pub fn handler(&self) -> Handler<P> {
        let events = Arc::clone(&self.events);
        let changed = Arc::clone(&self.changed);
        handler(move |payload: &P| {
            events.lock().unwrap().push(payload.clone());
            changed.notify_waiters();
        })
    }

    pub fn events(&self) -> Vec<P> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until `predicate` holds for the recorded payloads.
    pub async fn wait_until<F: Fn(&[P]) -> bool>(&self, predicate: F) {
        timeout(WAIT, async {
            loop {
                let notified = self.changed.notified();
                if predicate(&self.events.lock().unwrap()) {
                    return;
                }
                notified.await;
            }
        })
        .await
        .unwrap();
    }
}

/// Poll `condition` until it holds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
