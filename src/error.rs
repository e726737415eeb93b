use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

#[cfg(feature = "health")]
/// HTTP method type, re-exported for use with error inspection.
pub use reqwest::Method;
#[cfg(feature = "health")]
/// HTTP status code type, re-exported for use with error inspection.
pub use reqwest::StatusCode;

use crate::types::{ConnectionStatus, LifecycleEvent};

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Invalid options or arguments supplied by the caller
    Validation,
    /// Error reported by the underlying transport
    Transport,
    /// The connection actor has shut down and no longer accepts commands
    Closed,
    /// Error related to a non-successful HTTP call
    #[cfg(feature = "health")]
    Status,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            source: None,
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    #[must_use]
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn closed() -> Self {
        Self::new(Kind::Closed)
    }

    #[cfg(feature = "health")]
    pub fn status<S: Into<String>>(
        status_code: StatusCode,
        method: Method,
        path: String,
        message: S,
    ) -> Self {
        Status {
            status_code,
            method,
            path,
            message: message.into(),
        }
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

/// A lifecycle event arrived that has no transition from the current status.
///
/// This is a defect in whatever produced the event, never a runtime condition.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub from: ConnectionStatus,
    pub event: LifecycleEvent,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no transition from {} on lifecycle event {:?}",
            self.from, self.event
        )
    }
}

impl StdError for InvariantViolation {}

/// A listener panicked while an event was being emitted.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerPanic {
    pub event: String,
    pub message: String,
}

impl fmt::Display for HandlerPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler for event `{}` panicked: {}",
            self.event, self.message
        )
    }
}

impl StdError for HandlerPanic {}

#[cfg(feature = "health")]
#[non_exhaustive]
#[derive(Debug)]
pub struct Status {
    pub status_code: StatusCode,
    pub method: Method,
    pub path: String,
    pub message: String,
}

#[cfg(feature = "health")]
impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error({}) making {} call to {} with {}",
            self.status_code, self.method, self.path, self.message
        )
    }
}

#[cfg(feature = "health")]
impl StdError for Status {}

#[cfg(feature = "health")]
impl From<Status> for Error {
    fn from(err: Status) -> Self {
        Error::with_source(Kind::Status, err)
    }
}

#[cfg(feature = "health")]
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

#[cfg(any(feature = "health", feature = "ws"))]
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}
