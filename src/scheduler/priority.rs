// 优先级评分
//
// 就绪集按得分降序排列，同分按入队序号保持稳定
// 评分在每轮调度时重新计算，不做缓存

use crate::scheduler::job::UploadJob;

/// 小文件加分上限对应的体积（MB）
const SIZE_BONUS_CEILING_MB: f64 = 10.0;

/// 排队时长加分上限
const AGE_BONUS_CAP: f64 = 5.0;

/// 每次失败的评分惩罚
const RETRY_PENALTY_PER_ATTEMPT: f64 = 2.0;

/// 小文件加分：体积越小越优先，超过 10MB 不再加分
fn size_bonus(size_bytes: u64) -> f64 {
    let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
    (SIZE_BONUS_CEILING_MB - size_mb).max(0.0)
}

/// 排队时长加分：每排队一分钟 +1，封顶 +5，防止低优先级任务饿死
fn age_bonus(age_ms: i64) -> f64 {
    let age_minutes = (age_ms.max(0) as f64) / 60_000.0;
    age_minutes.min(AGE_BONUS_CAP)
}

/// 重试惩罚：反复失败的任务下沉，但永远不会被排除
fn retry_penalty(attempts: u32) -> f64 {
    attempts as f64 * RETRY_PENALTY_PER_ATTEMPT
}

/// 计算任务的调度得分
pub fn score(job: &UploadJob, now_ms: i64) -> f64 {
    job.priority.weight()
        + size_bonus(job.payload.size)
        + age_bonus(now_ms - job.created_at)
        - retry_penalty(job.attempts)
}

/// 将候选列表按 (得分降序, 序号升序) 排列
///
/// 元素为 (score, seq, 任意附带数据)
pub fn order_candidates<T>(candidates: &mut Vec<(f64, u64, T)>) {
    candidates.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{JobPriority, UploadJob, UploadPayload};
    use std::path::PathBuf;

    const MB: u64 = 1024 * 1024;

    fn job_with(priority: JobPriority, size: u64, attempts: u32) -> UploadJob {
        let payload = UploadPayload::from_file("f", PathBuf::from("./f"), size, "application/octet-stream");
        let mut job = UploadJob::new(payload, priority, 3, 0);
        job.attempts = attempts;
        job
    }

    #[test]
    fn test_higher_tier_wins() {
        let urgent = job_with(JobPriority::Urgent, 10 * MB, 0);
        let low = job_with(JobPriority::Low, 10 * MB, 0);
        let now = urgent.created_at;

        assert!(score(&urgent, now) > score(&low, now));
    }

    #[test]
    fn test_smaller_payload_favored() {
        let small = job_with(JobPriority::Normal, MB, 0);
        let big = job_with(JobPriority::Normal, 50 * MB, 0);
        let now = small.created_at;

        assert!(score(&small, now) > score(&big, now));
    }

    #[test]
    fn test_size_bonus_bounded_at_zero() {
        // 超大文件不会产生负加分
        assert_eq!(size_bonus(500 * MB), 0.0);
        assert!(size_bonus(MB) > 0.0);
    }

    #[test]
    fn test_age_bonus_capped() {
        assert_eq!(age_bonus(0), 0.0);
        assert!((age_bonus(60_000) - 1.0).abs() < 1e-9);
        // 排队一小时也只加 5 分
        assert_eq!(age_bonus(3_600_000), AGE_BONUS_CAP);
        // 时钟回拨不产生负分
        assert_eq!(age_bonus(-5000), 0.0);
    }

    #[test]
    fn test_retry_penalty_sinks_but_never_excludes() {
        let fresh = job_with(JobPriority::Normal, 10 * MB, 0);
        let beaten = job_with(JobPriority::Normal, 10 * MB, 4);
        let now = fresh.created_at;

        assert!(score(&fresh, now) > score(&beaten, now));
        // 分数可为负，但任务仍参与排序
        assert!(score(&beaten, now).is_finite());
    }

    #[test]
    fn test_ordering_stable_on_ties() {
        let mut candidates = vec![
            (5.0, 2, "b"),
            (7.0, 3, "c"),
            (5.0, 1, "a"),
        ];
        order_candidates(&mut candidates);

        let ids: Vec<&str> = candidates.iter().map(|c| c.2).collect();
        // 最高分在前，同分按入队顺序
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
