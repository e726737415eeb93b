//! Pure connection-status state machine.
//!
//! [`reduce`] maps a status and one lifecycle event onto the next status. It
//! performs no I/O and keeps no state, so ordering is entirely the caller's
//! responsibility: events must be applied in the order they were emitted.

use crate::error::InvariantViolation;
use crate::types::{ConnectionStatus, LifecycleEvent};

/// Apply a single lifecycle event.
///
/// Pairs with no defined transition return an [`InvariantViolation`] instead
/// of being ignored.
pub fn reduce(
    status: ConnectionStatus,
    event: &LifecycleEvent,
) -> Result<ConnectionStatus, InvariantViolation> {
    use ConnectionStatus::{Connected, Connecting, Disconnected, Error, Reconnecting};

    let next = match (status, event) {
        (Disconnected | Error, LifecycleEvent::ConnectStarted) => Connecting,

        (Disconnected | Connecting | Error, LifecycleEvent::Connected { .. }) => Connected,
        (Disconnected | Connecting | Error, LifecycleEvent::ConnectError { .. }) => Error,

        (_, LifecycleEvent::Disconnected { reason }) if reason.is_client_initiated() => {
            Disconnected
        }
        (Connected, LifecycleEvent::Disconnected { .. }) => Reconnecting,

        (Reconnecting | Error, LifecycleEvent::ReconnectAttempt { .. }) => Reconnecting,
        (Reconnecting, LifecycleEvent::ReconnectSucceeded { .. }) => Connected,
        (Reconnecting, LifecycleEvent::ReconnectFailed { .. }) => Error,

        _ => {
            return Err(InvariantViolation {
                from: status,
                event: event.clone(),
            });
        }
    };

    Ok(next)
}

/// Apply a sequence of lifecycle events in order, stopping at the first
/// violation.
pub fn reduce_all<'event, I>(
    status: ConnectionStatus,
    events: I,
) -> Result<ConnectionStatus, InvariantViolation>
where
    I: IntoIterator<Item = &'event LifecycleEvent>,
{
    events
        .into_iter()
        .try_fold(status, |current, event| reduce(current, event))
}
