// Smart Upload Scheduler
// 弱网环境下保证批量上传最终完成的客户端调度引擎

// 配置管理模块
pub mod config;

// 任务事件模块
pub mod events;

// 日志初始化
pub mod logging;

// 上传调度模块
pub mod scheduler;

// 导出常用类型
pub use config::{BackoffConfig, SchedulerConfig};
pub use events::{EventPriority, EventThrottler, JobEvent};
pub use scheduler::{
    optimal_concurrency, BackoffPolicy, JobPriority, JobStatus, NetworkClass, NetworkMonitor,
    PayloadSource, ProgressReporter, QueueStats, StaticNetworkMonitor, StatusCounts, SubProgress,
    UploadExecutor, UploadJob, UploadOutcome, UploadPayload, UploadScheduler,
};
