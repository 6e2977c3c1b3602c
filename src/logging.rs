//! 日志系统配置
//!
//! 面向宿主应用和示例的控制台日志初始化；库内部只使用 tracing 宏，
//! 不假设任何订阅器存在

use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 初始化控制台日志
///
/// 日志级别优先读取 RUST_LOG 环境变量，缺省使用传入的 level；
/// 重复初始化会被忽略，方便在测试中随意调用
pub fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_ansi(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init();
}
