//! 每进程交换区
//!
//! 每个地址空间独占一段字节缓冲区，每个虚拟页一个槽位，保存不在物理内存中的页的内容。
//! 交换区只随地址空间一起释放，不在进程间共享。

use crate::Vpn;
use alloc::vec::Vec;

/// 交换区
#[derive(Debug, Clone, Default)]
pub struct SwapStore {
    page_size: usize,
    data: Vec<u8>,
}

impl SwapStore {
    /// 创建 `pages` 个槽位、全部清零的交换区
    pub fn new(pages: usize, page_size: usize) -> Self {
        Self {
            page_size,
            data: alloc::vec![0u8; pages * page_size],
        }
    }

    /// 没有后备缓冲区的交换区（立即装载模式）
    pub fn detached() -> Self {
        Self::default()
    }

    /// 槽位数量
    pub fn pages(&self) -> usize {
        self.data.len().checked_div(self.page_size).unwrap_or(0)
    }

    /// 虚拟页 `vpn` 的槽位
    pub fn slot(&self, vpn: Vpn) -> Option<&[u8]> {
        let start = vpn.checked_mul(self.page_size)?;
        self.data.get(start..start + self.page_size)
    }

    /// 虚拟页 `vpn` 的可变槽位
    pub fn slot_mut(&mut self, vpn: Vpn) -> Option<&mut [u8]> {
        let start = vpn.checked_mul(self.page_size)?;
        self.data.get_mut(start..start + self.page_size)
    }

    /// 从另一个交换区复制虚拟页 `vpn` 的槽位，任一方没有该槽位时返回 `false`
    pub fn copy_slot_from(&mut self, other: &SwapStore, vpn: Vpn) -> bool {
        match (other.slot(vpn), self.slot_mut(vpn)) {
            (Some(src), Some(dst)) if src.len() == dst.len() => {
                dst.copy_from_slice(src);
                true
            }
            _ => false,
        }
    }
}
