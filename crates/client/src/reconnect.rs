//! Exponential-backoff reconnection for the realtime channel.
//!
//! When the connection to the backend drops, the channel task calls
//! [`reconnect_loop`] to keep retrying with increasing delays until the
//! connection is restored, the server rejects our credentials, or the
//! [`CancellationToken`] is triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{RealtimeClient, RealtimeClientError, RealtimeConnection};

/// Retry timing for a dropped realtime connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Wait before the first attempt.
    pub initial_delay: Duration,
    /// Ceiling for the wait between attempts.
    pub max_delay: Duration,
    /// Growth of the wait after each failed attempt.
    pub factor: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2,
        }
    }
}

/// Attempt schedule of one reconnect run.
///
/// Yields `(attempt, wait)` pairs; `attempt` is the number reported in
/// `ChannelState::Reconnecting` and starts at 1.
#[derive(Debug, Clone)]
pub struct Backoff {
    max_delay: Duration,
    factor: u32,
    attempt: u32,
    wait: Duration,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            max_delay: config.max_delay,
            factor: config.factor.max(1),
            attempt: 0,
            wait: config.initial_delay.min(config.max_delay),
        }
    }
}

impl Iterator for Backoff {
    type Item = (u32, Duration);

    fn next(&mut self) -> Option<Self::Item> {
        self.attempt = self.attempt.saturating_add(1);
        let current = self.wait;
        self.wait = current.saturating_mul(self.factor).min(self.max_delay);
        Some((self.attempt, current))
    }
}

/// How a [`reconnect_loop`] run ended.
#[derive(Debug)]
pub enum ReconnectOutcome {
    Connected(RealtimeConnection),
    Cancelled,
    /// The server refused the session; retrying cannot succeed.
    Rejected(RealtimeClientError),
}

/// Reconnect with exponential backoff.
///
/// Each attempt waits its delay first, then `on_attempt` is called with
/// the attempt number before connecting.
pub async fn reconnect_loop(
    client: &RealtimeClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    on_attempt: impl Fn(u32),
) -> ReconnectOutcome {
    for (attempt, wait) in Backoff::new(config) {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(url = %client.url(), "Reconnect cancelled");
                return ReconnectOutcome::Cancelled;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        on_attempt(attempt);
        tracing::info!(
            url = %client.url(),
            attempt,
            waited_ms = wait.as_millis() as u64,
            "Reconnecting realtime channel",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(url = %client.url(), "Reconnect cancelled");
                return ReconnectOutcome::Cancelled;
            }
            result = client.connect() => match result {
                Ok(conn) => {
                    tracing::info!(url = %client.url(), attempt, "Realtime channel reconnected");
                    return ReconnectOutcome::Connected(conn);
                }
                Err(e) if e.is_rejected() => {
                    tracing::warn!(url = %client.url(), error = %e, "Reconnect rejected by server");
                    return ReconnectOutcome::Rejected(e);
                }
                Err(e) => {
                    tracing::warn!(
                        url = %client.url(),
                        attempt,
                        error = %e,
                        "Reconnect attempt failed",
                    );
                }
            },
        }
    }
    // Backoff never ends.
    ReconnectOutcome::Cancelled
}
