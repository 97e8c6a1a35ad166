//! 模拟机器接口

use crate::Pid;
use crate::page_table::PageTableEntry;

/// 模拟机器中与内存管理相关的部分
///
/// 机器拥有物理内存字节数组和当前生效的页表；
/// 虚拟内存管理只通过这里读写物理内存、安装页表。
/// 偏移都是物理地址，调用方保证区间不越界。
pub trait Machine {
    /// 物理内存总字节数
    fn memory_size(&self) -> usize;

    /// 从物理地址 `offset` 读取 `buf.len()` 字节
    fn read_physical(&self, offset: usize, buf: &mut [u8]);

    /// 向物理地址 `offset` 写入 `bytes`
    fn write_physical(&mut self, offset: usize, bytes: &[u8]);

    /// 把进程 `pid` 的页表安装为当前地址翻译结构
    fn install_translation(&mut self, pid: Pid, table: &[PageTableEntry]);
}
