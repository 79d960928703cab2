//! Durable ping storage and quota enforcement.

pub mod database;
pub mod quota;

pub use database::{PING_STORE_NAME, PingObserver, PingStore};
pub use quota::{DEFAULT_MAX_PINGS_COUNT, DEFAULT_MAX_PINGS_SIZE, QuotaConfig};

#[cfg(test)]
pub use database::MockPingObserver;
