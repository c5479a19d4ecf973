//! Reconnection policy and decision logic (pure)
//!
//! Backoff is `min(initial_delay * 1.5^attempts, max_delay)` where `attempts`
//! is the number of attempts already scheduled since the last successful
//! connect. Reconnection stops once `max_attempts` have been scheduled.

use std::time::Duration;

/// Backoff multiplier between consecutive attempts
pub const BACKOFF_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectionDecision {
    /// Schedule attempt number `attempt` after `delay`
    Proceed { attempt: u32, delay: Duration },
    /// Automatic reconnection is switched off
    Disabled,
    /// Give up until the next explicit connect
    AbortMaxAttemptsExceeded,
}

impl ReconnectPolicy {
    /// Delay before the next attempt, given how many were already scheduled
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exponent = attempts.min(i32::MAX as u32) as i32;
        let delay_ms = (initial_ms * BACKOFF_FACTOR.powi(exponent)).min(max_ms);
        Duration::from_millis(delay_ms.floor() as u64)
    }

    /// Decide whether to schedule another attempt (pure function)
    pub fn decide(&self, attempts: u32) -> ReconnectionDecision {
        if !self.enabled {
            return ReconnectionDecision::Disabled;
        }
        if attempts >= self.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }
        ReconnectionDecision::Proceed {
            attempt: attempts + 1,
            delay: self.backoff_delay(attempts),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("initial reconnect delay must be greater than 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("max reconnect delay must be >= initial reconnect delay".to_string());
        }
        Ok(())
    }
}
