// 上传调度器
//
// 任务表的唯一写入方。职责：
// - 按固定节奏（或队列变化、任务完成时）执行调度轮次
// - 根据网络档位与在途数量计算空闲槽位，按优先级评分派发
// - 失败任务登记退避期，到期自动重新排队
// - 每个在途任务持有独立的取消令牌，互不影响
//
// 调度轮次是"读取 -> 计算 -> 写入"的整体，轮次内部出错只记日志，
// 不会中断循环，也不会留下写到一半的任务状态

use anyhow::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::events::{EventThrottler, JobEvent};
use crate::scheduler::backoff::BackoffPolicy;
use crate::scheduler::executor::{ProgressReporter, UploadExecutor, UploadOutcome};
use crate::scheduler::job::{now_ms, JobPriority, JobStatus, UploadJob, UploadPayload};
use crate::scheduler::network::{optimal_concurrency, NetworkMonitor, StaticNetworkMonitor};
use crate::scheduler::priority;
use crate::scheduler::stats::QueueStats;

/// 调度器共享内部状态
struct SchedulerInner {
    /// 上传执行器
    executor: Arc<dyn UploadExecutor>,
    /// 网络监测器
    monitor: Arc<dyn NetworkMonitor>,
    /// 任务表（job_id -> 任务）
    jobs: DashMap<String, Arc<RwLock<UploadJob>>>,
    /// 在途任务的取消令牌（job_id -> token）
    inflight: DashMap<String, CancellationToken>,
    /// 退避中任务的解禁时刻（job_id -> 单调时钟时刻）
    retry_deadlines: DashMap<String, Instant>,
    /// 入队序号分配器
    seq_counter: AtomicU64,
    /// 最大并发数（动态可调整）
    max_concurrency: AtomicUsize,
    /// 未显式指定时的重试上限
    default_max_retries: u32,
    /// 调度轮询间隔
    tick_interval: Duration,
    /// 进度事件节流间隔（毫秒）
    progress_interval_ms: u64,
    /// 调度循环是否在运行
    running: AtomicBool,
    /// 全局暂停闸门：暂停期间不派发新任务，在途任务自然完成
    paused: AtomicBool,
    /// 退避策略
    backoff: BackoffPolicy,
    /// 事件广播通道
    events: broadcast::Sender<JobEvent>,
    /// 调度唤醒信号（入队、完成、恢复时触发，立即补位）
    wake: Notify,
    /// 当前调度循环的取消令牌
    loop_token: parking_lot::Mutex<CancellationToken>,
}

/// 上传调度器
///
/// 克隆开销极小，可以在多处持有；所有克隆共享同一份任务表
#[derive(Clone)]
pub struct UploadScheduler {
    inner: Arc<SchedulerInner>,
}

impl UploadScheduler {
    /// 创建调度器，网络监测使用默认的手动监测器（Unknown 档位）
    pub fn new(config: SchedulerConfig, executor: Arc<dyn UploadExecutor>) -> Self {
        Self::with_monitor(config, executor, Arc::new(StaticNetworkMonitor::default()))
    }

    /// 创建调度器并注入网络监测器
    pub fn with_monitor(
        config: SchedulerConfig,
        executor: Arc<dyn UploadExecutor>,
        monitor: Arc<dyn NetworkMonitor>,
    ) -> Self {
        info!(
            "创建上传调度器: 最大并发={}, 轮询间隔={}ms, 默认重试上限={}",
            config.max_concurrency, config.tick_interval_ms, config.default_max_retries
        );

        let (events, _) = broadcast::channel(config.event_buffer_size.max(8));

        Self {
            inner: Arc::new(SchedulerInner {
                executor,
                monitor,
                jobs: DashMap::new(),
                inflight: DashMap::new(),
                retry_deadlines: DashMap::new(),
                seq_counter: AtomicU64::new(0),
                max_concurrency: AtomicUsize::new(config.max_concurrency.max(1)),
                default_max_retries: config.default_max_retries,
                tick_interval: Duration::from_millis(config.tick_interval_ms.max(10)),
                progress_interval_ms: config.progress_event_interval_ms,
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                backoff: config.backoff.policy(),
                events,
                wake: Notify::new(),
                loop_token: parking_lot::Mutex::new(CancellationToken::new()),
            }),
        }
    }

    // =====================================================
    // 对外 API
    // =====================================================

    /// 任务入队，返回任务 ID，不会阻塞
    ///
    /// max_retries 为 None 时使用配置的默认值
    pub fn enqueue(
        &self,
        payload: UploadPayload,
        priority: JobPriority,
        max_retries: Option<u32>,
    ) -> String {
        let seq = self.inner.seq_counter.fetch_add(1, Ordering::SeqCst);
        let retries = max_retries.unwrap_or(self.inner.default_max_retries);
        let job = UploadJob::new(payload, priority, retries, seq);
        let id = job.id.clone();

        info!(
            "任务入队: {} ({}, {} 字节, 优先级 {:?})",
            id, job.payload.name, job.payload.size, priority
        );
        let name = job.payload.name.clone();
        let size = job.payload.size;

        self.inner.jobs.insert(id.clone(), Arc::new(RwLock::new(job)));
        Self::emit(
            &self.inner,
            JobEvent::Created {
                job_id: id.clone(),
                name,
                size,
                priority,
            },
        );
        self.inner.wake.notify_one();
        id
    }

    /// 取消任务，幂等：终态任务上的取消是空操作
    pub async fn cancel(&self, id: &str) {
        let job = match self.inner.jobs.get(id).map(|e| e.value().clone()) {
            Some(job) => job,
            None => return,
        };

        let mut j = job.write().await;
        if j.is_terminal() {
            return;
        }

        if let Some((_, token)) = self.inner.inflight.remove(id) {
            token.cancel();
        }
        self.inner.retry_deadlines.remove(id);

        let old = j.status;
        j.mark_cancelled();
        info!("任务 {} 已取消", id);
        Self::emit_status(&self.inner, id, old, JobStatus::Cancelled);
        Self::emit(
            &self.inner,
            JobEvent::Cancelled {
                job_id: id.to_string(),
            },
        );
    }

    /// 调整排队/失败任务的优先级，只影响后续调度，不抢占在途任务
    pub async fn set_priority(&self, id: &str, priority: JobPriority) -> Result<()> {
        let job = self
            .inner
            .jobs
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| anyhow::anyhow!("任务不存在: {}", id))?;

        let mut j = job.write().await;
        match j.status {
            JobStatus::Pending | JobStatus::Error => {
                debug!("任务 {} 优先级调整: {:?} -> {:?}", id, j.priority, priority);
                j.priority = priority;
                self.inner.wake.notify_one();
                Ok(())
            }
            other => anyhow::bail!("任务 {} 处于 {} 状态，无法调整优先级", id, other.as_str()),
        }
    }

    /// 手动重试失败任务
    ///
    /// 尝试次数回退一次后立即重新排队，重试出局的任务因此获得一次额外机会
    pub async fn retry(&self, id: &str) -> Result<()> {
        let job = self
            .inner
            .jobs
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| anyhow::anyhow!("任务不存在: {}", id))?;

        let mut j = job.write().await;
        if j.status != JobStatus::Error {
            anyhow::bail!("任务 {} 未处于失败状态，无法手动重试", id);
        }

        self.inner.retry_deadlines.remove(id);
        let old = j.status;
        j.manual_retry();
        info!("任务 {} 手动重试，已尝试 {} 次", id, j.attempts);
        Self::emit_status(&self.inner, id, old, JobStatus::Pending);
        self.inner.wake.notify_one();
        Ok(())
    }

    /// 暂停单个在途任务（仅上传中的任务可暂停）
    pub async fn pause_job(&self, id: &str) -> Result<()> {
        let job = self
            .inner
            .jobs
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| anyhow::anyhow!("任务不存在: {}", id))?;

        let mut j = job.write().await;
        if j.status != JobStatus::Uploading {
            anyhow::bail!("任务 {} 处于 {} 状态，仅上传中的任务可暂停", id, j.status.as_str());
        }

        if let Some((_, token)) = self.inner.inflight.remove(id) {
            token.cancel();
        }
        let old = j.status;
        j.mark_paused();
        info!("任务 {} 已暂停", id);
        Self::emit_status(&self.inner, id, old, JobStatus::Paused);
        Self::emit(&self.inner, JobEvent::Paused { job_id: id.to_string() });
        Ok(())
    }

    /// 恢复已暂停的任务，重新排队等待调度
    pub async fn resume_job(&self, id: &str) -> Result<()> {
        let job = self
            .inner
            .jobs
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| anyhow::anyhow!("任务不存在: {}", id))?;

        let mut j = job.write().await;
        if j.status != JobStatus::Paused {
            anyhow::bail!("任务 {} 未处于暂停状态", id);
        }

        let old = j.status;
        j.reset_for_requeue();
        info!("任务 {} 已恢复", id);
        Self::emit_status(&self.inner, id, old, JobStatus::Pending);
        Self::emit(&self.inner, JobEvent::Resumed { job_id: id.to_string() });
        self.inner.wake.notify_one();
        Ok(())
    }

    /// 将任务移出队列，在途任务会先被取消
    pub async fn remove(&self, id: &str) {
        if let Some((_, token)) = self.inner.inflight.remove(id) {
            token.cancel();
        }
        self.inner.retry_deadlines.remove(id);

        if let Some((_, job)) = self.inner.jobs.remove(id) {
            let mut j = job.write().await;
            if !j.is_terminal() {
                j.mark_cancelled();
            }
            info!("任务 {} 已移出队列", id);
            Self::emit(&self.inner, JobEvent::Deleted { job_id: id.to_string() });
        }
    }

    /// 清理所有已完成任务，返回清理数量
    pub async fn clear_completed(&self) -> usize {
        let entries: Vec<(String, Arc<RwLock<UploadJob>>)> = self
            .inner
            .jobs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut cleared = 0;
        for (id, job) in entries {
            let done = job.read().await.status == JobStatus::Completed;
            if done && self.inner.jobs.remove(&id).is_some() {
                Self::emit(&self.inner, JobEvent::Deleted { job_id: id });
                cleared += 1;
            }
        }

        if cleared > 0 {
            info!("已清理 {} 个完成任务", cleared);
        }
        cleared
    }

    /// 启动调度循环
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("调度器已在运行，忽略重复启动");
            return;
        }

        let token = CancellationToken::new();
        *self.inner.loop_token.lock() = token.clone();

        let inner = self.inner.clone();
        tokio::spawn(async move {
            Self::run_loop(inner, token).await;
        });
    }

    /// 停止调度循环并取消全部在途任务
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.inner.loop_token.lock().cancel();
        self.inner.wake.notify_one();

        let active: Vec<(String, CancellationToken)> = self
            .inner
            .inflight
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (id, token) in active {
            token.cancel();
            self.inner.inflight.remove(&id);

            let job = match self.inner.jobs.get(&id).map(|e| e.value().clone()) {
                Some(job) => job,
                None => continue,
            };
            let mut j = job.write().await;
            if j.is_in_flight() {
                let old = j.status;
                j.mark_cancelled();
                Self::emit_status(&self.inner, &id, old, JobStatus::Cancelled);
                Self::emit(&self.inner, JobEvent::Cancelled { job_id: id.clone() });
            }
        }

        info!("调度器已停止");
    }

    /// 全局暂停：不再派发新任务，在途任务自然完成
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("调度已暂停，在途任务继续完成");
        }
    }

    /// 解除全局暂停
    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            info!("调度已恢复");
            self.inner.wake.notify_one();
        }
    }

    /// 动态调整最大并发数，下一轮调度生效
    pub fn set_max_concurrency(&self, new_max: usize) {
        let new_max = new_max.max(1);
        let old = self.inner.max_concurrency.swap(new_max, Ordering::SeqCst);
        info!("🔧 动态调整最大并发数: {} -> {}", old, new_max);
        self.inner.wake.notify_one();
    }

    /// 调度循环是否在运行
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// 是否处于全局暂停
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// 在途任务数量
    pub fn in_flight_count(&self) -> usize {
        self.inner.inflight.len()
    }

    /// 单个任务快照
    pub async fn job(&self, id: &str) -> Option<UploadJob> {
        let job = self.inner.jobs.get(id).map(|e| e.value().clone())?;
        let snapshot = job.read().await.clone();
        Some(snapshot)
    }

    /// 全部任务快照，按入队顺序排列
    pub async fn jobs(&self) -> Vec<UploadJob> {
        let entries: Vec<Arc<RwLock<UploadJob>>> =
            self.inner.jobs.iter().map(|e| e.value().clone()).collect();

        let mut snapshots = Vec::with_capacity(entries.len());
        for job in entries {
            snapshots.push(job.read().await.clone());
        }
        snapshots.sort_by_key(|j| j.seq);
        snapshots
    }

    /// 队列统计快照
    pub async fn stats(&self) -> QueueStats {
        QueueStats::collect(&self.jobs().await, now_ms())
    }

    /// 订阅任务事件
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    // =====================================================
    // 调度循环
    // =====================================================

    async fn run_loop(inner: Arc<SchedulerInner>, token: CancellationToken) {
        info!("🚀 上传调度循环已启动");

        loop {
            if token.is_cancelled() || !inner.running.load(Ordering::SeqCst) {
                break;
            }

            // 轮次放在独立任务里执行，出错或 panic 都只记日志，下一轮照常执行
            match tokio::spawn(Self::scheduling_pass(inner.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("调度轮次执行出错: {:#}", e),
                Err(e) => error!("调度轮次异常中断: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(inner.tick_interval) => {}
                _ = inner.wake.notified() => {}
                _ = token.cancelled() => break,
            }
        }

        info!("上传调度循环已停止");
    }

    /// 单个调度轮次：读取 -> 计算 -> 写入
    async fn scheduling_pass(inner: Arc<SchedulerInner>) -> Result<()> {
        let inner = &inner;
        Self::promote_backed_off(inner).await;

        if inner.paused.load(Ordering::SeqCst) {
            return Ok(());
        }

        let class = inner.monitor.current_class();
        let limit = optimal_concurrency(class, inner.max_concurrency.load(Ordering::SeqCst));
        let available = limit.saturating_sub(inner.inflight.len());
        if available == 0 {
            return Ok(());
        }

        // 先把条目收集出来，避免跨 await 持有表的分片锁
        let entries: Vec<(String, Arc<RwLock<UploadJob>>)> = inner
            .jobs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let now = now_ms();
        let mut candidates: Vec<(f64, u64, (String, Arc<RwLock<UploadJob>>))> = Vec::new();
        for (id, job) in entries {
            let snapshot = job.read().await;
            if snapshot.status != JobStatus::Pending {
                continue;
            }
            // 退避期未满的任务不参与本轮
            if inner.retry_deadlines.contains_key(&id) {
                continue;
            }
            let score = priority::score(&snapshot, now);
            let seq = snapshot.seq;
            drop(snapshot);
            candidates.push((score, seq, (id, job)));
        }

        priority::order_candidates(&mut candidates);

        for (score, _, (id, job)) in candidates.into_iter().take(available) {
            Self::dispatch(inner, id, job, score).await;
        }

        Ok(())
    }

    /// 将退避期已满的失败任务重新放回待调度队列
    async fn promote_backed_off(inner: &Arc<SchedulerInner>) {
        let now = Instant::now();
        let due: Vec<String> = inner
            .retry_deadlines
            .iter()
            .filter(|e| *e.value() <= now)
            .map(|e| e.key().clone())
            .collect();

        for id in due {
            inner.retry_deadlines.remove(&id);

            let job = match inner.jobs.get(&id).map(|e| e.value().clone()) {
                Some(job) => job,
                None => continue,
            };
            let mut j = job.write().await;
            if j.status == JobStatus::Error && !j.retries_exhausted() {
                let old = j.status;
                j.reset_for_requeue();
                debug!("任务 {} 退避期满，重新排队 (已尝试 {} 次)", id, j.attempts);
                Self::emit_status(inner, &id, old, JobStatus::Pending);
            }
        }
    }

    /// 派发单个任务
    async fn dispatch(
        inner: &Arc<SchedulerInner>,
        id: String,
        job: Arc<RwLock<UploadJob>>,
        score: f64,
    ) {
        let token = CancellationToken::new();
        inner.inflight.insert(id.clone(), token.clone());

        {
            let mut j = job.write().await;
            // 收集快照到这里之间任务可能已被取消/移除，双重校验
            if j.status != JobStatus::Pending {
                inner.inflight.remove(&id);
                return;
            }
            let old = j.status;
            j.mark_uploading();
            debug!(
                "派发任务 {} (得分 {:.2}, 第 {} 次尝试)",
                id,
                score,
                j.attempts + 1
            );
            Self::emit_status(inner, &id, old, JobStatus::Uploading);
        }

        let inner = inner.clone();
        tokio::spawn(async move {
            Self::run_job(inner, id, job, token).await;
        });
    }

    /// 执行单个任务并回写结果
    async fn run_job(
        inner: Arc<SchedulerInner>,
        id: String,
        job: Arc<RwLock<UploadJob>>,
        token: CancellationToken,
    ) {
        let payload = job.read().await.payload.clone();
        let reporter = ProgressReporter::new(
            job.clone(),
            inner.events.clone(),
            Arc::new(EventThrottler::with_millis(inner.progress_interval_ms)),
            token.clone(),
        );

        let result = tokio::select! {
            res = inner.executor.execute(payload, reporter, token.clone()) => Some(res),
            _ = token.cancelled() => None,
        };

        inner.inflight.remove(&id);

        match result {
            // 取消方已写入终态（cancelled / paused），这里只负责退出
            None => debug!("任务 {} 的执行已被取消", id),
            Some(Ok(outcome)) => Self::finish_success(&inner, &id, &job, outcome, &token).await,
            Some(Err(e)) => Self::finish_failure(&inner, &id, &job, e, &token).await,
        }

        // 通知调度循环立即补位
        inner.wake.notify_one();
    }

    async fn finish_success(
        inner: &Arc<SchedulerInner>,
        id: &str,
        job: &Arc<RwLock<UploadJob>>,
        outcome: UploadOutcome,
        token: &CancellationToken,
    ) {
        if token.is_cancelled() {
            return;
        }

        let mut j = job.write().await;
        if !j.is_in_flight() {
            return;
        }

        let old = j.status;
        j.mark_completed(outcome.remote_id.clone());
        info!("任务 {} 上传完成: {}", id, outcome.remote_id);
        Self::emit_status(inner, id, old, JobStatus::Completed);
        Self::emit(
            inner,
            JobEvent::Completed {
                job_id: id.to_string(),
                result: outcome.remote_id,
                completed_at: j.upload_ended_at.unwrap_or_else(now_ms),
            },
        );
    }

    async fn finish_failure(
        inner: &Arc<SchedulerInner>,
        id: &str,
        job: &Arc<RwLock<UploadJob>>,
        err: anyhow::Error,
        token: &CancellationToken,
    ) {
        if token.is_cancelled() {
            return;
        }

        let mut j = job.write().await;
        if !j.is_in_flight() {
            return;
        }

        let message = format!("{:#}", err);
        let old = j.status;
        j.mark_failed(message.clone());
        Self::emit_status(inner, id, old, JobStatus::Error);

        if j.will_retry() {
            // 延迟用抬升前的倍率计算，随后 schedule_retry 抬升倍率
            let delay = inner.backoff.delay(j.attempts, j.backoff_multiplier);
            let eligible_at = now_ms() + delay.as_millis() as i64;
            j.schedule_retry(eligible_at);
            inner
                .retry_deadlines
                .insert(id.to_string(), Instant::now() + delay);

            warn!(
                "任务 {} 第 {} 次尝试失败: {}，{:?} 后重试",
                id, j.attempts, message, delay
            );
            Self::emit(
                inner,
                JobEvent::Failed {
                    job_id: id.to_string(),
                    error: message,
                    attempts: j.attempts,
                    will_retry: true,
                },
            );
            Self::emit(
                inner,
                JobEvent::RetryScheduled {
                    job_id: id.to_string(),
                    attempts: j.attempts,
                    next_eligible_at: eligible_at,
                },
            );
        } else {
            error!(
                "⚠️ 任务 {} 重试耗尽 (已尝试 {} 次): {}",
                id, j.attempts, message
            );
            Self::emit(
                inner,
                JobEvent::Failed {
                    job_id: id.to_string(),
                    error: message,
                    attempts: j.attempts,
                    will_retry: false,
                },
            );
        }
    }

    fn emit(inner: &SchedulerInner, event: JobEvent) {
        let _ = inner.events.send(event);
    }

    fn emit_status(inner: &SchedulerInner, id: &str, old: JobStatus, new: JobStatus) {
        Self::emit(
            inner,
            JobEvent::StatusChanged {
                job_id: id.to_string(),
                old_status: old.as_str().to_string(),
                new_status: new.as_str().to_string(),
            },
        );
    }
}
