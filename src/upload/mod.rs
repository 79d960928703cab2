//! Ping delivery: upload coordination, rate limiting and the delivery worker.

pub mod manager;
pub mod policy;
pub mod rate_limiter;
pub mod request;
pub mod task;
pub mod uploader;
pub mod worker;

pub use manager::UploadManager;
pub use policy::DeliveryPolicy;
pub use rate_limiter::{RateLimitConfig, RateLimiter, RateLimiterState};
pub use request::{PingRequest, PingRequestError};
pub use task::{UploadOutcome, UploadResult, UploadTask};
pub use uploader::{DEFAULT_UPLOAD_TIMEOUT, HttpUploader, Uploader};
pub use worker::{UploadTaskSource, UploadWorker};
