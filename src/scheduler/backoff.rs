// 重试退避计算
//
// delay = min(base * 2^attempts * multiplier + jitter, max_delay)
// jitter 取 [0, 0.3 * base * 2^attempts * multiplier)，用于打散
// 共享网络故障恢复后的重试风暴

use rand::Rng;
use std::time::Duration;

/// 默认初始退避（毫秒）
const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// 默认退避上限（毫秒）
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// 抖动占原始延迟的比例
const JITTER_RATIO: f64 = 0.3;

/// 退避策略
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// 初始延迟
    pub base_delay: Duration,
    /// 延迟上限
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self { base_delay, max_delay }
    }

    /// 不含抖动的退避延迟（已封顶）
    ///
    /// attempts 固定时对 multiplier 单调，multiplier 固定时对 attempts 单调
    pub fn raw_delay(&self, attempts: u32, multiplier: f64) -> Duration {
        let factor = 2f64.powi(attempts.min(63) as i32);
        let raw_secs = self.base_delay.as_secs_f64() * factor * multiplier.max(0.0);
        let max_secs = self.max_delay.as_secs_f64();
        if !raw_secs.is_finite() || raw_secs >= max_secs {
            return self.max_delay;
        }
        Duration::from_secs_f64(raw_secs)
    }

    /// 含抖动的退避延迟（已封顶）
    pub fn delay(&self, attempts: u32, multiplier: f64) -> Duration {
        let raw = self.raw_delay(attempts, multiplier);
        if raw >= self.max_delay {
            return self.max_delay;
        }

        let raw_secs = raw.as_secs_f64();
        let jitter_span = raw_secs * JITTER_RATIO;
        let jitter = if jitter_span > 0.0 {
            rand::thread_rng().gen_range(0.0..jitter_span)
        } else {
            0.0
        };

        let total = (raw_secs + jitter).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_raw_delay_growth() {
        let policy = BackoffPolicy::default();

        // 1s, 2s, 4s, 8s ...
        assert_eq!(policy.raw_delay(0, 1.0), Duration::from_secs(1));
        assert_eq!(policy.raw_delay(1, 1.0), Duration::from_secs(2));
        assert_eq!(policy.raw_delay(2, 1.0), Duration::from_secs(4));

        // 倍率参与计算
        assert_eq!(policy.raw_delay(1, 1.5), Duration::from_secs(3));
    }

    #[test]
    fn test_raw_delay_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.raw_delay(10, 1.0), Duration::from_secs(30));
        // 极端参数不会溢出
        assert_eq!(policy.raw_delay(u32::MAX, 100.0), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = BackoffPolicy::default();

        for _ in 0..50 {
            let raw = policy.raw_delay(1, 1.0);
            let jittered = policy.delay(1, 1.0);
            assert!(jittered >= raw);
            assert!(jittered.as_secs_f64() <= raw.as_secs_f64() * (1.0 + 0.3) + 1e-9);
        }
    }

    #[test]
    fn test_delay_at_cap_skips_jitter() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(20, 1.0), Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn prop_raw_delay_monotonic_in_attempts(attempts in 0u32..20, multiplier in 1.0f64..10.0) {
            let policy = BackoffPolicy::default();
            let a = policy.raw_delay(attempts, multiplier);
            let b = policy.raw_delay(attempts + 1, multiplier);
            prop_assert!(b >= a);
            prop_assert!(b <= policy.max_delay);
        }

        #[test]
        fn prop_delay_never_exceeds_cap(attempts in 0u32..40, multiplier in 0.5f64..20.0) {
            let policy = BackoffPolicy::default();
            prop_assert!(policy.delay(attempts, multiplier) <= policy.max_delay);
        }
    }
}
