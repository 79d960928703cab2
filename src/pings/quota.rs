use crate::domain::QueuedPing;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_MAX_PINGS_COUNT: usize = 250;
pub const DEFAULT_MAX_PINGS_SIZE: usize = 10 * 1024 * 1024;

/// Limits applied to the stored pings before they are replayed for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub max_count: usize,
    /// Total serialized size in bytes.
    pub max_size: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_PINGS_COUNT,
            max_size: DEFAULT_MAX_PINGS_SIZE,
        }
    }
}

/// Result of a quota pass.
#[derive(Debug, Default)]
pub(crate) struct QuotaOutcome {
    /// Surviving pings: deletion requests first, the rest oldest first.
    pub kept: Vec<QueuedPing>,
    pub evicted: Vec<QueuedPing>,
}

/// Splits `pings` (sorted oldest first) into kept and evicted pings.
///
/// Deletion-request pings are never evicted. The others are walked newest to
/// oldest; the first ping that takes the running count or size over its limit
/// is evicted together with every older one.
pub(crate) fn enforce(pings: Vec<QueuedPing>, config: &QuotaConfig) -> QuotaOutcome {
    let (deletion_requests, others): (Vec<_>, Vec<_>) =
        pings.into_iter().partition(QueuedPing::is_deletion_request);

    let mut count = 0usize;
    let mut size = 0usize;
    let mut over_size = false;
    let mut over_count = false;
    let mut kept = Vec::with_capacity(others.len());
    let mut evicted = Vec::new();

    for ping in others.into_iter().rev() {
        count += 1;
        size += ping.ping.size_in_bytes();

        if !over_size && size > config.max_size {
            warn!(
                max_size = config.max_size,
                "Pending pings directory has reached the size quota. Clearing the oldest pings."
            );
            over_size = true;
        }
        if !over_count && count > config.max_count {
            warn!(
                max_count = config.max_count,
                "Pending pings directory has reached the count quota. Clearing the oldest pings."
            );
            over_count = true;
        }

        if over_size || over_count {
            evicted.push(ping);
        } else {
            kept.push(ping);
        }
    }

    kept.reverse();
    let mut survivors = deletion_requests;
    survivors.extend(kept);
    QuotaOutcome {
        kept: survivors,
        evicted,
    }
}
