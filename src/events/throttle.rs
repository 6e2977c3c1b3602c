//! 进度事件节流
//!
//! 进度回调可能非常密集，订阅方只需要固定频率的采样，
//! 这里用原子 CAS 实现无锁的时间节流

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

/// 进程级单调时钟起点，所有节流器共享同一参照系
fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

fn now_millis() -> u64 {
    epoch().elapsed().as_millis() as u64
}

/// 事件节流器
///
/// 典型用法：每次要发布进度事件前调用 `should_emit()`，返回 true 才发布
#[derive(Debug)]
pub struct EventThrottler {
    /// 上次放行时间（相对 epoch 的毫秒）
    last_emit_ms: AtomicU64,
    /// 最小放行间隔（毫秒）
    interval_ms: u64,
}

impl EventThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_emit_ms: AtomicU64::new(0),
            interval_ms: interval.as_millis() as u64,
        }
    }

    /// 按毫秒间隔构造
    pub fn with_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms))
    }

    /// 是否放行本次事件
    ///
    /// 距上次放行已超过间隔时返回 true 并推进时间戳；
    /// CAS 失败说明别的线程刚抢到放行权，本次丢弃
    pub fn should_emit(&self) -> bool {
        let now = now_millis();
        let last = self.last_emit_ms.load(Ordering::Relaxed);

        if now.saturating_sub(last) < self.interval_ms && last != 0 {
            return false;
        }

        self.last_emit_ms
            .compare_exchange(last, now.max(1), Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// 强制放行（收尾事件不受节流约束）
    pub fn force_emit(&self) {
        self.last_emit_ms.store(now_millis().max(1), Ordering::Relaxed);
    }

    /// 重置节流状态
    pub fn reset(&self) {
        self.last_emit_ms.store(0, Ordering::Relaxed);
    }
}

impl Default for EventThrottler {
    fn default() -> Self {
        Self::with_millis(DEFAULT_THROTTLE_INTERVAL_MS)
    }
}
