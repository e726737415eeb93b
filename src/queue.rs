//! Outbound actions held while the connection is not `Connected`.

#![expect(
    clippy::module_name_repetitions,
    reason = "PendingQueue reads better than a bare Queue at call sites"
)]

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::events;

/// Result of [`crate::transport::TransportConnection::send`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SendOutcome {
    /// Handed to the transport while connected.
    Delivered,
    /// Held in the pending queue until the next transition into `Connected`.
    Queued,
    /// The pending queue was full.
    Dropped,
}

/// Category of a pending action, derived from its event name.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ActionKind {
    Chat,
    VoiceStart,
    VoiceStop,
    Other,
}

impl ActionKind {
    #[must_use]
    pub fn from_event(event: &str) -> Self {
        match event {
            events::CHAT_MESSAGE | events::USER_MESSAGE => Self::Chat,
            events::VOICE_START => Self::VoiceStart,
            events::VOICE_STOP => Self::VoiceStop,
            _ => Self::Other,
        }
    }
}

/// An outbound message waiting for the connection to come back.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub event: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingAction {
    #[must_use]
    pub fn new(event: String, payload: Value, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            kind: ActionKind::from_event(&event),
            event,
            payload,
            enqueued_at,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, max_age: Option<TimeDelta>) -> bool {
        max_age.is_some_and(|age| now.signed_duration_since(self.enqueued_at) > age)
    }
}

/// Bounded FIFO of [`PendingAction`]s with optional age expiry.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    actions: VecDeque<PendingAction>,
    max_len: usize,
    max_age: Option<TimeDelta>,
}

impl PendingQueue {
    #[must_use]
    pub fn new(max_len: usize, max_age: Option<Duration>) -> Self {
        Self {
            actions: VecDeque::new(),
            max_len,
            max_age: max_age.and_then(|age| TimeDelta::from_std(age).ok()),
        }
    }

    /// Enqueue `action` after expiring stale entries. Returns
    /// [`SendOutcome::Dropped`] when the queue is still full.
    pub fn push(&mut self, action: PendingAction, now: DateTime<Utc>) -> SendOutcome {
        self.expire(now);

        if self.actions.len() >= self.max_len {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                event = %action.event,
                kind = %action.kind,
                max_len = self.max_len,
                "Pending queue full, dropping action"
            );
            return SendOutcome::Dropped;
        }

        self.actions.push_back(action);
        SendOutcome::Queued
    }

    /// Replace the capacity and age limits. Actions already queued are kept,
    /// even beyond the new `max_len`; expiry applies on the next push or flush.
    pub fn set_limits(&mut self, max_len: usize, max_age: Option<Duration>) {
        self.max_len = max_len;
        self.max_age = max_age.and_then(|age| TimeDelta::from_std(age).ok());
    }

    /// Put an action back at the head, ahead of everything queued after it.
    pub fn push_front(&mut self, action: PendingAction) {
        self.actions.push_front(action);
    }

    pub fn pop_front(&mut self) -> Option<PendingAction> {
        self.actions.pop_front()
    }

    /// Drop every action older than the configured maximum age. Returns the
    /// number of actions removed.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.actions.len();
        let max_age = self.max_age;
        self.actions
            .retain(|action| !action.is_expired(now, max_age));
        let expired = before - self.actions.len();

        #[cfg(feature = "tracing")]
        if expired > 0 {
            tracing::debug!(expired, "Expired stale pending actions");
        }

        expired
    }

    /// Remove everything, returning how many actions were discarded.
    pub fn clear(&mut self) -> usize {
        let len = self.actions.len();
        self.actions.clear();
        len
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingAction> {
        self.actions.iter()
    }
}
