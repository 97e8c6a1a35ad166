//! 调页统计

/// 调页计数器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmStats {
    /// 缺页次数（fork 复制的页也计入）
    pub page_faults: u64,
    /// 从属主手中夺走物理帧的次数
    pub evictions: u64,
    /// 脏页写入交换区的次数
    pub swap_outs: u64,
    /// 从交换区读回的次数
    pub swap_ins: u64,
    /// fork 时复制的页数
    pub frames_copied: u64,
}
