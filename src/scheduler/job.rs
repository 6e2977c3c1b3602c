// 上传任务记录定义
//
// 任务的全部状态都集中在 UploadJob 上，状态迁移通过 mark_* 方法完成，
// 调度器（及其派生的执行任务）是唯一的写入方，其余组件只读快照

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 等待调度
    Pending,
    /// 上传中
    Uploading,
    /// 服务端处理中（传输已完成，等待后处理）
    Processing,
    /// 已完成
    Completed,
    /// 失败（重试耗尽前会自动回到 Pending）
    Error,
    /// 已暂停
    Paused,
    /// 已取消
    Cancelled,
}

impl JobStatus {
    /// 状态的小写名称，与序列化结果一致
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Paused => "paused",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// 优先级档位
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl JobPriority {
    /// 档位权重（参与优先级评分）
    pub fn weight(&self) -> f64 {
        match self {
            JobPriority::Urgent => 4.0,
            JobPriority::High => 3.0,
            JobPriority::Normal => 2.0,
            JobPriority::Low => 1.0,
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

/// 待上传的数据来源
///
/// 调度器本身从不读取字节内容，只有执行器会真正消费
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSource {
    /// 本地文件
    File(PathBuf),
    /// 内存数据（共享引用，快照克隆不复制字节）
    Memory(Arc<Vec<u8>>),
}

/// 上传载荷描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPayload {
    /// 展示名称（通常为文件名）
    pub name: String,
    /// 数据来源
    pub source: PayloadSource,
    /// 字节大小（由调用方提供）
    pub size: u64,
    /// 内容类型标签
    pub content_type: String,
}

impl UploadPayload {
    /// 构造文件载荷
    pub fn from_file(name: impl Into<String>, path: PathBuf, size: u64, content_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: PayloadSource::File(path),
            size,
            content_type: content_type.into(),
        }
    }

    /// 构造内存载荷
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>, content_type: impl Into<String>) -> Self {
        let size = data.len() as u64;
        Self {
            name: name.into(),
            source: PayloadSource::Memory(Arc::new(data)),
            size,
            content_type: content_type.into(),
        }
    }
}

/// 后处理阶段进度（纯信息展示，不影响调度）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubProgress {
    /// 阶段名称（如 "analyzing"）
    pub stage: String,
    /// 阶段进度 0-100
    pub progress: u8,
    /// 附加说明
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// 上传任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    /// 任务ID
    pub id: String,
    /// 载荷
    pub payload: UploadPayload,
    /// 任务状态
    pub status: JobStatus,
    /// 整体进度 0-100
    ///
    /// 上传/处理阶段只增不减且封顶 99，只有 mark_completed 写入 100，
    /// 因此任意时刻 progress == 100 等价于 status == Completed
    pub progress: u8,
    /// 后处理阶段进度
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_progress: Option<SubProgress>,
    /// 最近一次失败信息，仅在 Error 状态下存在
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 已发起的上传次数（每次失败 +1）
    pub attempts: u32,
    /// 自动重试上限（首次尝试之外最多重试 max_retries 次）
    pub max_retries: u32,
    /// 退避倍率，初始 1.0，每次失败后 ×1.5
    pub backoff_multiplier: f64,
    /// 重试解禁时间 (Unix 毫秒)，失败后写入，成功或手动重试时清除
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_eligible_at: Option<i64>,
    /// 优先级档位
    pub priority: JobPriority,
    /// 入队序号，同分排序的稳定依据
    pub seq: u64,
    /// 创建时间 (Unix 毫秒)
    pub created_at: i64,
    /// 本轮上传开始时间 (Unix 毫秒)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_started_at: Option<i64>,
    /// 上传结束时间 (Unix 毫秒)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_ended_at: Option<i64>,
    /// 成功后执行器返回的远端标识
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// 当前 Unix 毫秒时间戳
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl UploadJob {
    /// 创建新的上传任务
    pub fn new(payload: UploadPayload, priority: JobPriority, max_retries: u32, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            status: JobStatus::Pending,
            progress: 0,
            sub_progress: None,
            error: None,
            attempts: 0,
            max_retries,
            backoff_multiplier: 1.0,
            next_eligible_at: None,
            priority,
            seq,
            created_at: now_ms(),
            upload_started_at: None,
            upload_ended_at: None,
            result: None,
        }
    }

    /// 已传输字节数 = size * progress / 100
    pub fn transferred_bytes(&self) -> u64 {
        self.payload.size * self.progress as u64 / 100
    }

    /// 自动重试是否已耗尽
    pub fn retries_exhausted(&self) -> bool {
        self.attempts > self.max_retries
    }

    /// 是否会自动重试（失败但还有重试额度）
    pub fn will_retry(&self) -> bool {
        self.status == JobStatus::Error && !self.retries_exhausted()
    }

    /// 是否为终态
    ///
    /// Completed / Cancelled 恒为终态；Error 在重试耗尽后成为终态
    pub fn is_terminal(&self) -> bool {
        match self.status {
            JobStatus::Completed | JobStatus::Cancelled => true,
            JobStatus::Error => self.retries_exhausted(),
            _ => false,
        }
    }

    /// 是否正在执行（持有取消令牌）
    pub fn is_in_flight(&self) -> bool {
        matches!(self.status, JobStatus::Uploading | JobStatus::Processing)
    }

    /// 标记为上传中
    pub fn mark_uploading(&mut self) {
        self.status = JobStatus::Uploading;
        self.error = None;
        self.upload_started_at = Some(now_ms());
        self.upload_ended_at = None;
    }

    /// 标记为服务端处理中
    pub fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self, result: String) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
        self.next_eligible_at = None;
        self.upload_ended_at = Some(now_ms());
    }

    /// 标记为失败，尝试次数 +1
    pub fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Error;
        self.error = Some(error);
        self.attempts += 1;
        self.upload_ended_at = Some(now_ms());
    }

    /// 登记下一次重试的解禁时间，并抬升退避倍率
    ///
    /// 延迟计算发生在倍率抬升之前，由调用方保证
    pub fn schedule_retry(&mut self, next_eligible_at: i64) {
        self.next_eligible_at = Some(next_eligible_at);
        self.backoff_multiplier *= 1.5;
    }

    /// 标记为已暂停
    pub fn mark_paused(&mut self) {
        self.status = JobStatus::Paused;
    }

    /// 标记为已取消
    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.error = None;
        self.next_eligible_at = None;
        self.upload_ended_at = Some(now_ms());
    }

    /// 重新回到待调度状态（重试/恢复时使用），进度清零
    pub fn reset_for_requeue(&mut self) {
        self.status = JobStatus::Pending;
        self.progress = 0;
        self.sub_progress = None;
        self.error = None;
        self.next_eligible_at = None;
        self.upload_started_at = None;
        self.upload_ended_at = None;
    }

    /// 手动重试：尝试次数回退一次，立即重新排队
    ///
    /// 只回退一次而不清零，给失败出局的任务一条额外生路，同时保留历史
    pub fn manual_retry(&mut self) {
        self.attempts = self.attempts.saturating_sub(1);
        self.reset_for_requeue();
    }

    /// 应用执行器上报的进度：只增不减，封顶 99
    ///
    /// 返回应用后的进度值；非执行状态下不做任何修改
    pub fn apply_progress(&mut self, percent: u8) -> u8 {
        if self.is_in_flight() {
            let capped = percent.min(99);
            if capped > self.progress {
                self.progress = capped;
            }
        }
        self.progress
    }
}
