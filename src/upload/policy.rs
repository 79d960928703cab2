use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RECOVERABLE_FAILURES: u32 = 3;
pub const DEFAULT_MAX_WAIT_ATTEMPTS: u32 = 3;
pub const DEFAULT_MAX_PING_BODY_SIZE: usize = 1024 * 1024;

/// Bounds applied to a single upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPolicy {
    /// Recoverable failures tolerated before the session ends with `Done`.
    pub max_recoverable_failures: u32,
    /// Consecutive `Wait` tasks handed out before the session ends with `Done`.
    pub max_wait_attempts: u32,
    /// Upper bound for a request body, before and after compression.
    pub max_ping_body_size: usize,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_recoverable_failures: DEFAULT_MAX_RECOVERABLE_FAILURES,
            max_wait_attempts: DEFAULT_MAX_WAIT_ATTEMPTS,
            max_ping_body_size: DEFAULT_MAX_PING_BODY_SIZE,
        }
    }
}
