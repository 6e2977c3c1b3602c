//! 任务事件类型定义
//!
//! 调度器通过广播通道向订阅方推送任务事件，供展示层实时渲染

use serde::{Deserialize, Serialize};

use crate::scheduler::job::JobPriority;

/// 事件优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// 低优先级：进度更新
    Low = 0,
    /// 中优先级：状态变更
    Medium = 1,
    /// 高优先级：完成、失败、删除等关键事件
    High = 2,
}

/// 上传任务事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum JobEvent {
    /// 任务入队
    Created {
        job_id: String,
        name: String,
        size: u64,
        priority: JobPriority,
    },
    /// 传输进度
    Progress {
        job_id: String,
        progress: u8,
        transferred_bytes: u64,
        total_bytes: u64,
    },
    /// 后处理阶段进度
    StageProgress {
        job_id: String,
        stage: String,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// 状态变更
    StatusChanged {
        job_id: String,
        old_status: String,
        new_status: String,
    },
    /// 任务完成
    Completed {
        job_id: String,
        result: String,
        completed_at: i64,
    },
    /// 任务失败
    Failed {
        job_id: String,
        error: String,
        attempts: u32,
        will_retry: bool,
    },
    /// 已登记自动重试
    RetryScheduled {
        job_id: String,
        attempts: u32,
        next_eligible_at: i64,
    },
    /// 任务暂停
    Paused { job_id: String },
    /// 任务恢复
    Resumed { job_id: String },
    /// 任务取消
    Cancelled { job_id: String },
    /// 任务移出队列
    Deleted { job_id: String },
}

impl JobEvent {
    /// 获取任务 ID
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Created { job_id, .. } => job_id,
            JobEvent::Progress { job_id, .. } => job_id,
            JobEvent::StageProgress { job_id, .. } => job_id,
            JobEvent::StatusChanged { job_id, .. } => job_id,
            JobEvent::Completed { job_id, .. } => job_id,
            JobEvent::Failed { job_id, .. } => job_id,
            JobEvent::RetryScheduled { job_id, .. } => job_id,
            JobEvent::Paused { job_id } => job_id,
            JobEvent::Resumed { job_id } => job_id,
            JobEvent::Cancelled { job_id } => job_id,
            JobEvent::Deleted { job_id } => job_id,
        }
    }

    /// 获取事件优先级
    pub fn priority(&self) -> EventPriority {
        match self {
            JobEvent::Progress { .. } => EventPriority::Low,
            JobEvent::StageProgress { .. } => EventPriority::Low,
            JobEvent::StatusChanged { .. } => EventPriority::Medium,
            JobEvent::RetryScheduled { .. } => EventPriority::Medium,
            JobEvent::Created { .. }
            | JobEvent::Completed { .. }
            | JobEvent::Failed { .. }
            | JobEvent::Paused { .. }
            | JobEvent::Resumed { .. }
            | JobEvent::Cancelled { .. }
            | JobEvent::Deleted { .. } => EventPriority::High,
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            JobEvent::Created { .. } => "created",
            JobEvent::Progress { .. } => "progress",
            JobEvent::StageProgress { .. } => "stage_progress",
            JobEvent::StatusChanged { .. } => "status_changed",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Failed { .. } => "failed",
            JobEvent::RetryScheduled { .. } => "retry_scheduled",
            JobEvent::Paused { .. } => "paused",
            JobEvent::Resumed { .. } => "resumed",
            JobEvent::Cancelled { .. } => "cancelled",
            JobEvent::Deleted { .. } => "deleted",
        }
    }
}
