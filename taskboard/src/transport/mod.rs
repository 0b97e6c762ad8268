//! Push transport layer.
//!
//! [`cable::CableConsumer`] holds one auto-reconnecting Action Cable
//! connection with a single channel subscription and reports everything it
//! observes as [`TransportEvent`]s, in transport order, over one mpsc
//! channel. It owns retry and backoff; the layers above only ever see
//! connection state as information.

pub mod cable;

use std::time::Duration;

/// Errors establishing or keeping a push connection.
///
/// These are logged by the transport and never surfaced to the user.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint URL is not a usable `ws://` / `wss://` URL.
    #[error("invalid push endpoint: {0}")]
    InvalidUrl(String),

    /// Connecting took longer than the connect timeout.
    #[error("push connect timed out")]
    Timeout,

    /// Nothing is listening at the endpoint.
    #[error("push endpoint {0} is unreachable")]
    Unreachable(String),

    /// The server answered the upgrade with an HTTP error.
    #[error("push upgrade rejected with HTTP {0}")]
    Http(u16),

    /// WebSocket protocol failure.
    #[error("push protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O error.
    #[error("push I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the transport observed, in the order it observed it.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The subscription was confirmed on a fresh connection.
    Connected,
    /// A confirmed connection was lost. The transport will retry unless the
    /// server said not to.
    Disconnected {
        /// Why the connection ended, when known.
        reason: Option<String>,
    },
    /// The server refused the subscription. Terminal.
    Rejected,
    /// A broadcast on the subscribed channel.
    Message(serde_json::Value),
}

/// Reconnection backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the doubled delay.
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up; 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (1-based): `initial_delay`
    /// doubled per attempt, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }
}
