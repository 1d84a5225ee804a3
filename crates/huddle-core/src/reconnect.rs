//! Reconnection timing.
//!
//! After the socket closes, the session retries on a recurring timer until a
//! connection opens. The default is a fixed one-second interval with no
//! attempt limit. [`ReconnectConfig::exponential`] backs off up to a ceiling
//! for deployments that must not hammer a restarting engine.

use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier applied per attempt (1.0 = fixed interval)
    pub backoff_factor: f64,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            backoff_factor: 1.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Doubling backoff from 1s, capped at 30s, unlimited attempts.
    pub fn exponential() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: None,
        }
    }
}

/// Calculates the delay before reconnection attempt number `attempt` (1-based).
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Reconnection timer state. At most one attempt is ever scheduled.
#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    /// Number of reconnection attempts scheduled since the last open
    pub attempts: u32,
    /// When to attempt the next reconnection (ms)
    pub next_attempt_at: Option<u64>,
    /// Current backoff delay
    pub current_delay: Duration,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the next reconnection attempt, replacing any pending one.
    pub fn schedule_reconnect(&mut self, now_ms: u64, config: &ReconnectConfig) {
        self.attempts += 1;
        self.current_delay = calculate_backoff(self.attempts, config);
        self.next_attempt_at = Some(now_ms + self.current_delay.as_millis() as u64);
    }

    /// Drop the pending attempt without touching the counter. Idempotent.
    pub fn cancel(&mut self) {
        self.next_attempt_at = None;
    }

    /// Reset state after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_attempt_at = None;
        self.current_delay = Duration::ZERO;
    }

    pub fn is_pending(&self) -> bool {
        self.next_attempt_at.is_some()
    }

    /// Check if it's time to reconnect.
    pub fn should_reconnect(&self, now_ms: u64) -> bool {
        self.next_attempt_at.is_some_and(|t| now_ms >= t)
    }

    /// Check if max attempts exceeded.
    pub fn exceeded_max_attempts(&self, config: &ReconnectConfig) -> bool {
        config.max_attempts.is_some_and(|max| self.attempts > max)
    }
}
