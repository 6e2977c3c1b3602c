// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::scheduler::backoff::BackoffPolicy;

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 最大并发上传数（网络档位只会在此基础上收紧）
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 调度轮询间隔（毫秒）
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// 入队时未指定时使用的重试上限
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// 退避配置
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// 进度事件节流间隔（毫秒）
    #[serde(default = "default_progress_event_interval_ms")]
    pub progress_event_interval_ms: u64,
    /// 事件广播通道容量
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

fn default_max_concurrency() -> usize {
    3
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_progress_event_interval_ms() -> u64 {
    200
}

fn default_event_buffer_size() -> usize {
    256
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            tick_interval_ms: default_tick_interval_ms(),
            default_max_retries: default_max_retries(),
            backoff: BackoffConfig::default(),
            progress_event_interval_ms: default_progress_event_interval_ms(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

/// 退避配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// 初始退避延迟（毫秒）
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// 退避延迟上限（毫秒）
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffConfig {
    /// 换算为退避策略
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl SchedulerConfig {
    /// 从 TOML 文件加载配置
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("解析配置文件失败: {:?}", path))?;
        Ok(config)
    }

    /// 保存配置到 TOML 文件
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("写入配置文件失败: {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.backoff.base_delay_ms, 1000);
        assert_eq!(config.backoff.max_delay_ms, 30_000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        // 只给出部分字段，其余走默认值
        let config: SchedulerConfig = toml::from_str("max_concurrency = 5").unwrap();
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.backoff.max_delay_ms, 30_000);
    }

    #[test]
    fn test_backoff_policy_conversion() {
        let config = BackoffConfig {
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        };
        let policy = config.policy();
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.toml");

        let mut config = SchedulerConfig::default();
        config.max_concurrency = 8;
        config.backoff.base_delay_ms = 250;
        config.save(&path).await.unwrap();

        let loaded = SchedulerConfig::load(&path).await.unwrap();
        assert_eq!(loaded.max_concurrency, 8);
        assert_eq!(loaded.backoff.base_delay_ms, 250);
        assert_eq!(loaded.tick_interval_ms, config.tick_interval_ms);
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let result = SchedulerConfig::load("/nonexistent/scheduler.toml").await;
        assert!(result.is_err());
    }
}
