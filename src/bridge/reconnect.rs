//! Reconnection policy: exponential backoff with an optional attempt limit

use serde::{Deserialize, Serialize};

/// Backoff settings for broker reconnection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Attempts per outage before the bridge faults (None = unlimited)
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> u32 {
    2
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given 1-based attempt:
    /// `min(initial * multiplier^(attempt-1), max)`
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let factor = (self.multiplier as u64).checked_pow(exponent);
        factor
            .and_then(|f| self.initial_delay_ms.checked_mul(f))
            .map_or(self.max_delay_ms, |delay| delay.min(self.max_delay_ms))
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.max_attempts {
            return Err("max_attempts must be greater than 0 or absent for unlimited".to_string());
        }
        if self.initial_delay_ms == 0 {
            return Err("initial_delay_ms must be greater than 0".to_string());
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err("max_delay_ms must not be smaller than initial_delay_ms".to_string());
        }
        if self.multiplier == 0 {
            return Err("multiplier must be at least 1".to_string());
        }
        Ok(())
    }

    /// Decide whether another attempt may be made after `failed_attempts`
    /// consecutive failures
    pub fn should_attempt_reconnection(
        &self,
        failed_attempts: u32,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = self.max_attempts {
            if failed_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded { max_attempts };
            }
        }

        let attempt = failed_attempts + 1;
        // The first attempt of an outage goes out immediately
        let delay_ms = if failed_attempts == 0 {
            0
        } else {
            self.calculate_backoff_delay(failed_attempts)
        };
        ReconnectionDecision::Proceed { attempt, delay_ms }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded { max_attempts: u32 },
}
