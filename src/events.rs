//! Event names and payloads exchanged with the assistant backend.
//!
//! The connection core relays every message unchanged as a
//! [`serde_json::Value`]; these types are a convenience for consumers that
//! want to work with typed payloads via [`decode`].

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Outbound chat message from the user.
pub const CHAT_MESSAGE: &str = "chat_message";
/// Outbound chat message on the legacy bridge.
pub const USER_MESSAGE: &str = "user_message";
/// Reply to a [`CHAT_MESSAGE`].
pub const CHAT_RESPONSE: &str = "chat_response";
/// Reply to a [`USER_MESSAGE`].
pub const JARVIS_RESPONSE: &str = "jarvis_response";
/// An interaction was appended to (or removed from) memory.
pub const MEMORY_UPDATE: &str = "memory_update";
/// Request for a [`MEMORY_SNAPSHOT`].
pub const GET_MEMORY: &str = "get_memory";
pub const MEMORY_SNAPSHOT: &str = "memory_snapshot";
/// Sent by the backend right after a client connects.
pub const STATUS_UPDATE: &str = "status_update";
pub const EXECUTE_TASK: &str = "execute_task";
pub const TASK_UPDATE: &str = "task_update";
pub const VOICE_START: &str = "voice_start";
pub const VOICE_STOP: &str = "voice_stop";
/// Backend-side handler failure.
pub const ERROR: &str = "error";
/// Generic echo channel.
pub const MESSAGE: &str = "message";

/// Deserialize a relayed payload into one of the typed messages below.
pub fn decode<T: DeserializeOwned>(payload: &Value) -> Result<T> {
    Ok(T::deserialize(payload)?)
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: String,
}

impl ChatMessage {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    /// Backend clock, UTC without offset.
    pub timestamp: NaiveDateTime,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub speaker: String,
    pub message: String,
    pub timestamp: NaiveDateTime,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MemoryAction {
    Append,
    Update,
    Delete,
    Clear,
    #[serde(other)]
    Unknown,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub action: MemoryAction,
    pub entry: Option<MemoryEntry>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub connected: bool,
    pub socket_id: Option<String>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendError {
    pub message: String,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub result: Value,
}
