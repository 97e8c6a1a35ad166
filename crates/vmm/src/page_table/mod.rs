//! 页表模块
//!
//! 单级线性页表：按虚拟页号索引的 [`PageTableEntry`] 序列。
//! 页表长度在创建时确定，只有挂载共享内存段时会在末尾追加表项。

use crate::{FrameId, Vpn};
use alloc::vec::Vec;

bitflags::bitflags! {
    /// 页表项标志位
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PteFlags: u8 {
        /// 物理帧中保存着该页的当前内容
        const VALID      = 1 << 0;
        /// 属于共享内存段，永不换出
        const SHARED     = 1 << 1;
        /// 只读
        const READ_ONLY  = 1 << 2;
        /// 帧中内容比交换区新
        const DIRTY      = 1 << 3;
        /// 自上次清除后被访问过
        const REFERENCED = 1 << 4;
        /// 至少被装入过一次，此后内容以交换区为准
        const LOADED     = 1 << 5;
    }
}

/// 页表项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageTableEntry {
    /// 映射的物理帧，未映射时为 `None`
    pub frame: Option<FrameId>,
    /// 标志位
    pub flags: PteFlags,
}

impl PageTableEntry {
    /// 未映射、可写、从未装入的表项
    pub const fn empty() -> Self {
        Self {
            frame: None,
            flags: PteFlags::empty(),
        }
    }

    /// 指向 `frame` 的有效共享表项
    pub fn shared(frame: FrameId) -> Self {
        Self {
            frame: Some(frame),
            flags: PteFlags::VALID | PteFlags::SHARED | PteFlags::LOADED,
        }
    }

    /// 是否有效
    pub fn is_valid(&self) -> bool {
        self.flags.contains(PteFlags::VALID)
    }

    /// 是否属于共享内存段
    pub fn is_shared(&self) -> bool {
        self.flags.contains(PteFlags::SHARED)
    }

    /// 是否为脏页
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(PteFlags::DIRTY)
    }

    /// 是否只读
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(PteFlags::READ_ONLY)
    }

    /// 是否曾经装入过
    pub fn is_loaded(&self) -> bool {
        self.flags.contains(PteFlags::LOADED)
    }

    /// 当前映射的物理帧（仅在有效时返回）
    pub fn resident_frame(&self) -> Option<FrameId> {
        if self.is_valid() { self.frame } else { None }
    }

    /// 映射到 `frame` 并置为有效、已装入
    pub fn map(&mut self, frame: FrameId) {
        self.frame = Some(frame);
        self.flags.insert(PteFlags::VALID | PteFlags::LOADED);
    }

    /// 解除映射，保留 LOADED/SHARED/READ_ONLY
    pub fn unmap(&mut self) {
        self.frame = None;
        self.flags
            .remove(PteFlags::VALID | PteFlags::DIRTY | PteFlags::REFERENCED);
    }
}

/// 一个地址空间的页表
#[derive(Debug, Clone, Default)]
pub struct PageTable {
    entries: Vec<PageTableEntry>,
}

impl PageTable {
    /// 创建 `page_count` 个空表项的页表
    pub fn new(page_count: usize) -> Self {
        Self {
            entries: alloc::vec![PageTableEntry::empty(); page_count],
        }
    }

    /// 页数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 页表是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 获取虚拟页 `vpn` 的表项
    pub fn get(&self, vpn: Vpn) -> Option<&PageTableEntry> {
        self.entries.get(vpn)
    }

    /// 获取虚拟页 `vpn` 的可变表项
    pub fn get_mut(&mut self, vpn: Vpn) -> Option<&mut PageTableEntry> {
        self.entries.get_mut(vpn)
    }

    /// 在末尾追加表项，返回其虚拟页号
    pub fn push(&mut self, entry: PageTableEntry) -> Vpn {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// 截断到 `len` 个表项（共享段挂载失败时回退）
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// 所有表项，按虚拟页号排列
    pub fn entries(&self) -> &[PageTableEntry] {
        &self.entries
    }

    /// 按虚拟页号遍历表项
    pub fn iter(&self) -> impl Iterator<Item = (Vpn, &PageTableEntry)> {
        self.entries.iter().enumerate()
    }
}
