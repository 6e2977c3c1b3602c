// 上传调度模块

pub mod backoff;
pub mod executor;
pub mod job;
pub mod manager;
pub mod network;
pub mod priority;
pub mod stats;

pub use backoff::BackoffPolicy;
pub use executor::{ProgressReporter, UploadExecutor, UploadOutcome};
pub use job::{JobPriority, JobStatus, PayloadSource, SubProgress, UploadJob, UploadPayload};
pub use manager::UploadScheduler;
pub use network::{optimal_concurrency, NetworkClass, NetworkMonitor, StaticNetworkMonitor};
pub use stats::{QueueStats, StatusCounts};
