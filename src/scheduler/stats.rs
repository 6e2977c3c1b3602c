// 队列统计聚合
//
// 对任务快照做纯函数聚合，无副作用，每次状态变化后重算即可

use serde::{Deserialize, Serialize};

use crate::scheduler::job::{JobStatus, UploadJob};

/// 各状态任务数量
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub uploading: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
    pub paused: usize,
    pub cancelled: usize,
}

/// 队列统计快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// 任务总数
    pub total_count: usize,
    /// 各状态数量
    pub counts: StatusCounts,
    /// 等待自动重试的失败任务数
    pub retrying: usize,
    /// 重试耗尽、需要人工处理的失败任务数
    pub failed_permanently: usize,
    /// 总字节数
    pub total_bytes: u64,
    /// 已传输字节数
    pub transferred_bytes: u64,
    /// 整体进度百分比，total_bytes 为 0 时定义为 0
    pub overall_progress: f64,
    /// 预计剩余时间（秒），没有在途任务或吞吐为 0 时缺省
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
}

impl QueueStats {
    /// 从任务快照聚合统计
    pub fn collect(jobs: &[UploadJob], now_ms: i64) -> Self {
        let mut stats = QueueStats {
            total_count: jobs.len(),
            ..Default::default()
        };

        // 在途任务的吞吐合计 (bytes/s)
        let mut throughput: f64 = 0.0;
        let mut any_in_flight = false;

        for job in jobs {
            match job.status {
                JobStatus::Pending => stats.counts.pending += 1,
                JobStatus::Uploading => stats.counts.uploading += 1,
                JobStatus::Processing => stats.counts.processing += 1,
                JobStatus::Completed => stats.counts.completed += 1,
                JobStatus::Error => {
                    stats.counts.error += 1;
                    if job.will_retry() {
                        stats.retrying += 1;
                    } else {
                        stats.failed_permanently += 1;
                    }
                }
                JobStatus::Paused => stats.counts.paused += 1,
                JobStatus::Cancelled => stats.counts.cancelled += 1,
            }

            stats.total_bytes += job.payload.size;
            stats.transferred_bytes += job.transferred_bytes();

            if job.status == JobStatus::Uploading {
                if let Some(started) = job.upload_started_at {
                    let elapsed_secs = (now_ms - started) as f64 / 1000.0;
                    if elapsed_secs > 0.0 {
                        any_in_flight = true;
                        throughput += job.transferred_bytes() as f64 / elapsed_secs;
                    }
                }
            }
        }

        if stats.total_bytes > 0 {
            stats.overall_progress =
                stats.transferred_bytes as f64 / stats.total_bytes as f64 * 100.0;
        }

        if any_in_flight && throughput > 0.0 {
            let remaining = stats.total_bytes.saturating_sub(stats.transferred_bytes) as f64;
            stats.eta_secs = Some((remaining / throughput).ceil() as u64);
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{now_ms, JobPriority, UploadJob, UploadPayload};
    use std::path::PathBuf;

    fn job_sized(size: u64) -> UploadJob {
        let payload = UploadPayload::from_file("f", PathBuf::from("./f"), size, "text/plain");
        UploadJob::new(payload, JobPriority::Normal, 3, 0)
    }

    #[test]
    fn test_empty_queue() {
        let stats = QueueStats::collect(&[], now_ms());
        assert_eq!(stats.total_count, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.overall_progress, 0.0);
        assert!(stats.eta_secs.is_none());
    }

    #[test]
    fn test_counts_by_status() {
        let mut completed = job_sized(100);
        completed.mark_uploading();
        completed.mark_completed("r".to_string());

        let mut failed = job_sized(100);
        failed.max_retries = 0;
        failed.mark_uploading();
        failed.mark_failed("err".to_string());

        let mut retrying = job_sized(100);
        retrying.max_retries = 3;
        retrying.mark_uploading();
        retrying.mark_failed("err".to_string());

        let jobs = vec![job_sized(100), completed, failed, retrying];
        let stats = QueueStats::collect(&jobs, now_ms());

        assert_eq!(stats.total_count, 4);
        assert_eq!(stats.counts.pending, 1);
        assert_eq!(stats.counts.completed, 1);
        assert_eq!(stats.counts.error, 2);
        assert_eq!(stats.retrying, 1);
        assert_eq!(stats.failed_permanently, 1);
    }

    #[test]
    fn test_bytes_and_overall_progress() {
        let mut half = job_sized(1000);
        half.mark_uploading();
        half.apply_progress(50);

        let mut done = job_sized(1000);
        done.mark_uploading();
        done.mark_completed("r".to_string());

        let jobs = vec![half, done];
        let stats = QueueStats::collect(&jobs, now_ms());

        assert_eq!(stats.total_bytes, 2000);
        assert_eq!(stats.transferred_bytes, 1500);
        assert!((stats.overall_progress - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_eta_from_in_flight_throughput() {
        let mut job = job_sized(10_000);
        job.mark_uploading();
        // 10 秒前开始，已传 50%
        job.upload_started_at = Some(now_ms() - 10_000);
        job.apply_progress(50);

        let stats = QueueStats::collect(&[job], now_ms());
        // 吞吐 500 B/s，剩余 5000 B，约 10 秒
        let eta = stats.eta_secs.expect("应当给出 ETA");
        assert!((9..=11).contains(&eta), "eta = {}", eta);
    }

    #[test]
    fn test_eta_absent_without_in_flight() {
        let mut job = job_sized(10_000);
        job.mark_uploading();
        job.apply_progress(50);
        job.status = JobStatus::Pending;

        let stats = QueueStats::collect(&[job], now_ms());
        assert!(stats.eta_secs.is_none());
    }

    #[test]
    fn test_eta_absent_with_zero_throughput() {
        let mut job = job_sized(10_000);
        job.mark_uploading();
        job.upload_started_at = Some(now_ms() - 10_000);
        // 进度为 0，吞吐为 0

        let stats = QueueStats::collect(&[job], now_ms());
        assert!(stats.eta_secs.is_none());
    }
}
