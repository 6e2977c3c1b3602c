// 执行器接口与进度上报
//
// 真正的字节传输由外部注入的 UploadExecutor 完成，这里只约定边界：
// 进度通过 ProgressReporter 回流到任务记录，取消通过 CancellationToken 协作传递

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::{EventThrottler, JobEvent};
use crate::scheduler::job::{JobStatus, SubProgress, UploadJob, UploadPayload};

/// 执行器的成功返回
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// 远端标识（如文档 ID）
    pub remote_id: String,
}

/// 上传执行器
///
/// 对外部上传服务的唯一约定是"最终落定"：要么带着结果返回，
/// 要么带着可读的错误信息失败；内部如何分片、是否自带重试均不关心
#[async_trait]
pub trait UploadExecutor: Send + Sync {
    async fn execute(
        &self,
        payload: UploadPayload,
        reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> anyhow::Result<UploadOutcome>;
}

/// 进度上报句柄
///
/// 交给执行器使用；取消后拒绝一切状态写入，保证被取消的任务
/// 不会再被推回 uploading/processing 的进度
#[derive(Clone)]
pub struct ProgressReporter {
    job: Arc<RwLock<UploadJob>>,
    events: broadcast::Sender<JobEvent>,
    throttler: Arc<EventThrottler>,
    cancel: CancellationToken,
}

impl ProgressReporter {
    pub(crate) fn new(
        job: Arc<RwLock<UploadJob>>,
        events: broadcast::Sender<JobEvent>,
        throttler: Arc<EventThrottler>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job,
            events,
            throttler,
            cancel,
        }
    }

    /// 上报传输进度（0-100）
    ///
    /// 进度只增不减且在完成前封顶 99；节流后对外广播
    pub async fn report(&self, percent: u8) {
        if self.cancel.is_cancelled() {
            return;
        }

        let mut job = self.job.write().await;
        if !job.is_in_flight() {
            return;
        }

        let before = job.progress;
        let applied = job.apply_progress(percent);
        if applied == before {
            return;
        }

        if self.throttler.should_emit() {
            let _ = self.events.send(JobEvent::Progress {
                job_id: job.id.clone(),
                progress: applied,
                transferred_bytes: job.transferred_bytes(),
                total_bytes: job.payload.size,
            });
        }
    }

    /// 上报后处理阶段进度
    ///
    /// 首次调用会把任务从 Uploading 推进到 Processing
    pub async fn report_stage(&self, stage: &str, percent: u8, message: Option<String>) {
        if self.cancel.is_cancelled() {
            return;
        }

        let mut job = self.job.write().await;
        if !job.is_in_flight() {
            return;
        }

        if job.status == JobStatus::Uploading {
            debug!("任务 {} 进入服务端处理阶段: {}", job.id, stage);
            job.mark_processing();
            let _ = self.events.send(JobEvent::StatusChanged {
                job_id: job.id.clone(),
                old_status: JobStatus::Uploading.as_str().to_string(),
                new_status: JobStatus::Processing.as_str().to_string(),
            });
        }

        job.sub_progress = Some(SubProgress {
            stage: stage.to_string(),
            progress: percent.min(100),
            message: message.clone(),
        });

        if self.throttler.should_emit() {
            let _ = self.events.send(JobEvent::StageProgress {
                job_id: job.id.clone(),
                stage: stage.to_string(),
                progress: percent.min(100),
                message,
            });
        }
    }

    /// 任务是否已被取消
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{JobPriority, UploadJob, UploadPayload};

    fn reporter_fixture() -> (ProgressReporter, Arc<RwLock<UploadJob>>, CancellationToken) {
        let payload = UploadPayload::from_bytes("a.txt", vec![0u8; 1000], "text/plain");
        let mut job = UploadJob::new(payload, JobPriority::Normal, 3, 0);
        job.mark_uploading();

        let job = Arc::new(RwLock::new(job));
        let (tx, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let reporter = ProgressReporter::new(
            job.clone(),
            tx,
            Arc::new(EventThrottler::with_millis(0)),
            cancel.clone(),
        );
        (reporter, job, cancel)
    }

    #[tokio::test]
    async fn test_report_applies_progress() {
        let (reporter, job, _cancel) = reporter_fixture();

        reporter.report(42).await;
        assert_eq!(job.read().await.progress, 42);

        // 不回退
        reporter.report(10).await;
        assert_eq!(job.read().await.progress, 42);
    }

    #[tokio::test]
    async fn test_report_refused_after_cancel() {
        let (reporter, job, cancel) = reporter_fixture();

        reporter.report(30).await;
        cancel.cancel();
        reporter.report(80).await;

        assert_eq!(job.read().await.progress, 30);
    }

    #[tokio::test]
    async fn test_stage_report_enters_processing() {
        let (reporter, job, _cancel) = reporter_fixture();

        reporter.report_stage("analyzing", 40, Some("解析文档".to_string())).await;

        let j = job.read().await;
        assert_eq!(j.status, JobStatus::Processing);
        let sub = j.sub_progress.as_ref().unwrap();
        assert_eq!(sub.stage, "analyzing");
        assert_eq!(sub.progress, 40);
    }

    #[tokio::test]
    async fn test_progress_event_broadcast() {
        let payload = UploadPayload::from_bytes("a.txt", vec![0u8; 1000], "text/plain");
        let mut job = UploadJob::new(payload, JobPriority::Normal, 3, 0);
        job.mark_uploading();
        let job = Arc::new(RwLock::new(job));

        let (tx, mut rx) = broadcast::channel(16);
        let reporter = ProgressReporter::new(
            job,
            tx,
            Arc::new(EventThrottler::with_millis(0)),
            CancellationToken::new(),
        );

        reporter.report(55).await;

        let event = rx.try_recv().unwrap();
        match event {
            JobEvent::Progress {
                progress,
                transferred_bytes,
                ..
            } => {
                assert_eq!(progress, 55);
                assert_eq!(transferred_bytes, 550);
            }
            other => panic!("意外事件: {:?}", other),
        }
    }
}
