//! 虚拟内存配置
//!
//! 默认值与模拟机器的出厂参数一致：128 字节的页、32 个物理帧、
//! 1024 字节的用户栈，一次缺页服务耗时 1000 个时钟周期。

use crate::error::{VmError, VmResult};
use core::str::FromStr;

/// 页面置换策略，整个运行期间只选择一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
    /// 不做置换：物理帧用尽即失败
    #[default]
    NoReplacement,
    /// 随机选择牺牲帧
    Random,
    /// 时钟（二次机会）近似 LRU
    ClockLru,
    /// 精确 LRU
    ExactLru,
}

impl FromStr for PolicyKind {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(PolicyKind::NoReplacement),
            "random" => Ok(PolicyKind::Random),
            "clock" => Ok(PolicyKind::ClockLru),
            "lru" => Ok(PolicyKind::ExactLru),
            _ => Err(VmError::InvalidConfig),
        }
    }
}

/// 启动参数中的策略编号：1 不置换，2 随机，3 时钟，4 精确 LRU
impl TryFrom<u32> for PolicyKind {
    type Error = VmError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PolicyKind::NoReplacement),
            2 => Ok(PolicyKind::Random),
            3 => Ok(PolicyKind::ClockLru),
            4 => Ok(PolicyKind::ExactLru),
            _ => Err(VmError::InvalidConfig),
        }
    }
}

/// 地址空间的装载方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// 按需调页：第一次访问时才装入
    #[default]
    Demand,
    /// 创建地址空间时立即装入所有页，只能与 [`PolicyKind::NoReplacement`] 搭配
    Eager,
}

/// 虚拟内存配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// 页大小（字节）
    pub page_size: usize,
    /// 物理帧数量
    pub num_frames: usize,
    /// 用户栈大小（字节）
    pub user_stack_size: usize,
    /// 一次缺页服务的耗时（虚拟时钟周期）
    pub fault_latency: u64,
    /// 页面置换策略
    pub policy: PolicyKind,
    /// 装载方式
    pub load_mode: LoadMode,
    /// 随机策略的种子
    pub random_seed: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            page_size: 128,
            num_frames: 32,
            user_stack_size: 1024,
            fault_latency: 1000,
            policy: PolicyKind::NoReplacement,
            load_mode: LoadMode::Demand,
            random_seed: 0x5eed,
        }
    }
}

impl VmConfig {
    /// 以默认参数创建指定策略的配置
    pub fn with_policy(policy: PolicyKind) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// 物理内存总字节数
    pub fn memory_size(&self) -> usize {
        self.page_size * self.num_frames
    }

    /// 检查配置，`memory_size` 是模拟机器实际提供的物理内存大小
    pub fn validate(&self, memory_size: usize) -> VmResult<()> {
        if self.num_frames == 0 || self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(VmError::InvalidConfig);
        }
        if self.load_mode == LoadMode::Eager && self.policy != PolicyKind::NoReplacement {
            return Err(VmError::InvalidConfig);
        }
        match self.page_size.checked_mul(self.num_frames) {
            Some(needed) if needed <= memory_size => Ok(()),
            _ => Err(VmError::InvalidConfig),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_machine() {
        let config = VmConfig::default();
        assert_eq!(config.memory_size(), 128 * 32);
        assert!(config.validate(128 * 32).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_combinations() {
        let mut config = VmConfig::default();
        config.page_size = 100;
        assert_eq!(config.validate(1 << 20), Err(VmError::InvalidConfig));

        let mut config = VmConfig::default();
        config.num_frames = 0;
        assert_eq!(config.validate(1 << 20), Err(VmError::InvalidConfig));

        let mut config = VmConfig::with_policy(PolicyKind::ClockLru);
        config.load_mode = LoadMode::Eager;
        assert_eq!(config.validate(1 << 20), Err(VmError::InvalidConfig));

        // 物理内存比帧表小
        assert_eq!(
            VmConfig::default().validate(128 * 31),
            Err(VmError::InvalidConfig)
        );
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("clock".parse::<PolicyKind>(), Ok(PolicyKind::ClockLru));
        assert_eq!("lru".parse::<PolicyKind>(), Ok(PolicyKind::ExactLru));
        assert!("fifo".parse::<PolicyKind>().is_err());
        assert_eq!(PolicyKind::try_from(2), Ok(PolicyKind::Random));
        assert_eq!(PolicyKind::try_from(1), Ok(PolicyKind::NoReplacement));
        assert!(PolicyKind::try_from(5).is_err());
    }
}
