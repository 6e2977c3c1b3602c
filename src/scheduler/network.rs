// 网络状况监测
//
// 调度器不直接依赖任何平台的网络质量 API，由外部注入 NetworkMonitor 实现；
// 拿不到信号时退化为 Unknown，调度保持正确但更保守

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

/// 网络质量档位
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    Slow,
    Medium,
    Fast,
    Unknown,
}

/// 网络监测接口
///
/// 实现方负责把平台信号（或任意替代信号）翻译成 NetworkClass
pub trait NetworkMonitor: Send + Sync {
    /// 当前网络档位
    fn current_class(&self) -> NetworkClass;
}

/// 根据网络档位换算最优并发数
///
/// 结果受调用方配置的上限约束，只会收紧不会放大
pub fn optimal_concurrency(class: NetworkClass, configured_max: usize) -> usize {
    let max = configured_max.max(1);
    match class {
        NetworkClass::Slow => 1,
        NetworkClass::Medium => 2.min(max),
        NetworkClass::Fast => max,
        NetworkClass::Unknown => (max / 2).max(1),
    }
}

/// 手动设置的网络监测器
///
/// 没有平台信号时的默认实现，档位由调用方（或测试）显式更新
#[derive(Debug)]
pub struct StaticNetworkMonitor {
    class: RwLock<NetworkClass>,
}

impl StaticNetworkMonitor {
    pub fn new(class: NetworkClass) -> Self {
        Self {
            class: RwLock::new(class),
        }
    }

    /// 更新网络档位，下一轮调度生效
    pub fn set_class(&self, class: NetworkClass) {
        let mut current = self.class.write();
        if *current != class {
            info!("网络档位变更: {:?} -> {:?}", *current, class);
            *current = class;
        }
    }
}

impl Default for StaticNetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkClass::Unknown)
    }
}

impl NetworkMonitor for StaticNetworkMonitor {
    fn current_class(&self) -> NetworkClass {
        *self.class.read()
    }
}
