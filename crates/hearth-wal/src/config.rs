use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Tuning for WAL drain passes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Attempts per item per drain pass (default: 5).
    pub max_attempts: usize,
    /// Items uploaded concurrently (default: 3).
    pub upload_concurrency: usize,
    /// Delay before the second attempt; doubles per attempt.
    pub base_delay_ms: u64,
    /// Upper bound on a single back-off delay.
    pub max_delay_ms: u64,
    /// Fractional jitter applied to each delay (0.0 to 1.0).
    pub jitter: f64,
    /// Pause between consecutive drain passes of one drain loop.
    pub drain_pause_ms: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            upload_concurrency: 3,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
            jitter: 0.2,
            drain_pause_ms: 10,
        }
    }
}

impl WalConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_attempts, Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(self.jitter)
    }

    pub fn drain_pause(&self) -> Duration {
        Duration::from_millis(self.drain_pause_ms)
    }

    /// Concurrency bound, never below one.
    pub fn concurrency(&self) -> usize {
        self.upload_concurrency.max(1)
    }
}
