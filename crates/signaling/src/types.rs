//! Public types for the signaling channel.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors from the signaling channel.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("join rejected: {0}")]
    JoinRejected(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,
}

/// Lifecycle of a joined channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Socket connected, waiting for the join reply.
    Joining,
    /// Joined; events flow.
    Joined,
    /// Transport lost, attempting to reconnect and rejoin.
    Reconnecting { attempt: u32 },
    /// Left, closed by the server, or reconnection gave up.
    Closed,
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Attempts before giving up. `None` retries until the channel is left.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: Some(10),
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.0);
        Duration::from_secs_f64(with_jitter)
    }

    /// Returns `true` once `attempt` exceeds the configured limit.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}
