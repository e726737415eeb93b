use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;

use crate::Result;
use crate::error::Error;

const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY_DURATION: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_MAX_QUEUE_LEN: usize = 64;
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound on reconnection attempts after a connection is lost.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectLimit {
    /// Give up after this many attempts. `Attempts(0)` gives up immediately.
    Attempts(u32),
    /// Keep retrying until `disconnect()` is called.
    Unbounded,
}

impl ReconnectLimit {
    pub(crate) const fn is_exhausted(self, attempts: u32) -> bool {
        match self {
            Self::Attempts(max) => attempts >= max,
            Self::Unbounded => false,
        }
    }
}

/// Options for a [`super::TransportConnection`].
///
/// ```
/// use std::time::Duration;
/// use assistant_link::transport::{ConnectOptions, ReconnectLimit};
///
/// let options = ConnectOptions::builder()
///     .base_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_millis(800))
///     .max_reconnect_attempts(ReconnectLimit::Attempts(5))
///     .build();
/// assert!(options.reconnection);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ConnectOptions {
    /// Reconnect automatically after an unexpected disconnect
    #[builder(default = true)]
    pub reconnection: bool,
    /// Maximum number of reconnection attempts before settling in `Error`
    #[builder(default = ReconnectLimit::Attempts(DEFAULT_MAX_RECONNECT_ATTEMPTS))]
    pub max_reconnect_attempts: ReconnectLimit,
    /// Delay before the first reconnection attempt; doubled on each attempt
    #[builder(default = DEFAULT_BASE_DELAY_DURATION)]
    pub base_delay: Duration,
    /// Cap on the delay between attempts
    #[builder(default = DEFAULT_MAX_DELAY_DURATION)]
    pub max_delay: Duration,
    /// Bound on the initial handshake of each attempt
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    pub connect_timeout: Duration,
    /// Maximum number of actions held while not connected
    #[builder(default = DEFAULT_MAX_QUEUE_LEN)]
    pub max_queue_len: usize,
    /// Pending actions older than this are discarded instead of replayed
    pub max_queue_age: Option<Duration>,
    /// Panic on reducer invariant violations instead of logging them
    #[builder(default = cfg!(debug_assertions))]
    pub strict_invariants: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ConnectOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.base_delay.is_zero() {
            return Err(Error::validation("base_delay must be greater than zero"));
        }
        if self.max_delay < self.base_delay {
            return Err(Error::validation(format!(
                "max_delay ({:?}) must not be less than base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::validation(
                "connect_timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Deterministic exponential schedule: `base_delay`, doubling, capped at
    /// `max_delay`.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        self.into()
    }
}

impl From<&ConnectOptions> for ExponentialBackoff {
    fn from(options: &ConnectOptions) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(options.base_delay)
            .with_max_interval(options.max_delay)
            .with_multiplier(BACKOFF_MULTIPLIER)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None) // Attempts are capped separately
            .build()
    }
}

#[cfg(test)]
mod tests {
    use backoff::backoff::Backoff as _;

    use super::*;
    use crate::error::Kind;

    #[test]
    fn defaults() {
        let options = ConnectOptions::default();

        assert!(options.reconnection);
        assert_eq!(options.max_reconnect_attempts, ReconnectLimit::Attempts(5));
        assert_eq!(options.base_delay, Duration::from_millis(500));
        assert_eq!(options.max_delay, Duration::from_secs(30));
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.max_queue_len, 64);
        assert!(options.max_queue_age.is_none());
        options.validate().unwrap();
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let options = ConnectOptions::builder()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(800))
            .build();
        let mut backoff = options.backoff();

        let delays: Vec<u128> = (0..5)
            .map(|_| backoff.next_backoff().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 800]);
    }

    #[test]
    fn backoff_reset_restarts_schedule() {
        let options = ConnectOptions::builder()
            .base_delay(Duration::from_millis(250))
            .build();
        let mut backoff = options.backoff();

        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();

        assert_eq!(backoff.next_backoff().unwrap().as_millis(), 250);
    }

    #[test]
    fn reconnect_limit_exhaustion() {
        assert!(ReconnectLimit::Attempts(0).is_exhausted(0));
        assert!(!ReconnectLimit::Attempts(3).is_exhausted(2));
        assert!(ReconnectLimit::Attempts(3).is_exhausted(3));
        assert!(!ReconnectLimit::Unbounded.is_exhausted(u32::MAX));
    }

    #[test]
    fn zero_base_delay_is_rejected() {
        let options = ConnectOptions::builder().base_delay(Duration::ZERO).build();

        let err = options.validate().unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);
    }

    #[test]
    fn max_delay_below_base_is_rejected() {
        let options = ConnectOptions::builder()
            .base_delay(Duration::from_secs(2))
            .max_delay(Duration::from_secs(1))
            .build();

        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("max_delay"));
    }

    #[test]
    fn zero_connect_timeout_is_rejected() {
        let options = ConnectOptions::builder()
            .connect_timeout(Duration::ZERO)
            .build();

        assert_eq!(options.validate().unwrap_err().kind(), Kind::Validation);
    }
}
