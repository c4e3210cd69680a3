//! Client configuration.
//!
//! Retry budgets are counted in attempts; waits are derived from the node's
//! tick rate so a faster or slower cluster only needs different tick values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Ticks the node produces per second.
pub const DEFAULT_TICKS_PER_SECOND: u64 = 10;

/// Ticks per slot (one round of block production).
pub const DEFAULT_TICKS_PER_SLOT: u64 = 8;

/// How long a fetched blockhash is reused before asking the node again.
pub const DEFAULT_BLOCKHASH_MAX_AGE: Duration = Duration::from_secs(30);

/// Retry and timing policy for a `LedgerClient`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub ticks_per_second: u64,
    pub ticks_per_slot: u64,
    pub blockhash_max_age: Duration,
    /// Fetches of an unchanged blockhash before giving up.
    pub blockhash_refresh_attempts: u32,
    /// Send-then-poll rounds before giving up on confirmation.
    pub send_attempts: u32,
    /// Status polls per send.
    pub status_poll_attempts: u32,
    /// Upper bound of the random pause before resending a transaction that
    /// hit an account lock.
    pub account_in_use_jitter_ms: u64,
    /// Overall deadline for one send-and-confirm call.
    pub confirm_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            ticks_per_slot: DEFAULT_TICKS_PER_SLOT,
            blockhash_max_age: DEFAULT_BLOCKHASH_MAX_AGE,
            blockhash_refresh_attempts: 50,
            send_attempts: 10,
            status_poll_attempts: 6,
            account_in_use_jitter_ms: 100,
            confirm_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn slot_duration(&self) -> Duration {
        Duration::from_millis(self.ticks_per_slot * 1_000 / self.ticks_per_second.max(1))
    }

    /// Pause between blockhash fetches and between status polls: half a slot.
    pub fn poll_interval(&self) -> Duration {
        self.slot_duration() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_intervals() {
        let config = ClientConfig::default();
        assert_eq!(config.slot_duration(), Duration::from_millis(800));
        assert_eq!(config.poll_interval(), Duration::from_millis(400));
    }

    #[test]
    fn zero_tick_rate_does_not_divide_by_zero() {
        let config = ClientConfig {
            ticks_per_second: 0,
            ..ClientConfig::default()
        };
        assert_eq!(config.slot_duration(), Duration::from_millis(8_000));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{"send_attempts": 3}"#).unwrap();
        assert_eq!(config.send_attempts, 3);
        assert_eq!(config.status_poll_attempts, 6);
        assert_eq!(config.blockhash_max_age, DEFAULT_BLOCKHASH_MAX_AGE);
    }
}
