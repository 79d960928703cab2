use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_PINGS_PER_INTERVAL: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(with = "crate::app::duration_serde")]
    pub interval: Duration,
    pub max_pings_per_interval: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RATE_LIMIT_INTERVAL,
            max_pings_per_interval: DEFAULT_MAX_PINGS_PER_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimiterState {
    /// The caller may upload; one slot of the window was consumed.
    Available,
    /// The window is full until `remaining` has elapsed.
    Throttled { remaining: Duration },
}

/// Fixed-window counter limiting uploads per interval.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    started: Option<Instant>,
    count: u32,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            started: None,
            count: 0,
        }
    }

    /// Consumes one slot of the current window if any is left.
    pub fn get_state(&mut self) -> RateLimiterState {
        let now = Instant::now();
        let started = match self.started {
            Some(started) if now.saturating_duration_since(started) <= self.config.interval => {
                started
            }
            _ => {
                self.started = Some(now);
                self.count = 0;
                now
            }
        };

        if self.count >= self.config.max_pings_per_interval {
            let elapsed = now.saturating_duration_since(started);
            return RateLimiterState::Throttled {
                remaining: self.config.interval.saturating_sub(elapsed),
            };
        }

        self.count += 1;
        RateLimiterState::Available
    }
}
