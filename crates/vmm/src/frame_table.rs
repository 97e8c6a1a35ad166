//! 物理帧表
//!
//! 记录每个物理帧的归属：空闲、被某个地址空间的某个虚拟页独占，或属于共享内存段。
//! 共享帧的 `owner` 只表示"最后写入者"，仅用于日志。
//!
//! 帧表自身不做任何策略决定，选择空闲帧或牺牲帧由 [`crate::policy`] 负责，
//! 所有修改都发生在 [`crate::Vmm`] 的临界区内。

use crate::error::{VmError, VmResult};
use crate::{FrameId, Pid, Vpn};
use alloc::vec::Vec;

/// 一个物理帧的记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysicalFrame {
    /// 属主进程，`None` 表示空闲
    pub owner: Option<Pid>,
    /// 属主中映射到此帧的虚拟页号，只在有属主时有意义
    pub vpn: Vpn,
    /// 属于共享内存段
    pub shared: bool,
    /// 引用位，分配和访问时置位，时钟策略扫过时清除
    pub referenced: bool,
    /// 最近一次访问的时间戳
    pub last_used: u64,
}

impl PhysicalFrame {
    /// 是否空闲
    pub fn is_free(&self) -> bool {
        self.owner.is_none() && !self.shared
    }
}

/// 物理帧表
#[derive(Debug)]
pub struct FrameTable {
    frames: Vec<PhysicalFrame>,
    /// 单调递增的访问计数，作为 LRU 时间戳
    ticks: u64,
}

impl FrameTable {
    /// 创建 `num_frames` 个空闲帧的帧表
    pub fn new(num_frames: usize) -> Self {
        Self {
            frames: alloc::vec![PhysicalFrame::default(); num_frames],
            ticks: 0,
        }
    }

    /// 物理帧总数
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// 帧表是否为空
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// 获取帧记录
    pub fn get(&self, frame: FrameId) -> Option<&PhysicalFrame> {
        self.frames.get(frame)
    }

    /// 按帧号遍历
    pub fn iter(&self) -> impl Iterator<Item = (FrameId, &PhysicalFrame)> {
        self.frames.iter().enumerate()
    }

    /// 编号最小的空闲帧
    pub fn first_free(&self) -> Option<FrameId> {
        self.frames.iter().position(PhysicalFrame::is_free)
    }

    /// 空闲帧数量
    pub fn free_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_free()).count()
    }

    /// 共享帧数量
    pub fn shared_count(&self) -> usize {
        self.frames.iter().filter(|f| f.shared).count()
    }

    /// 帧能否被选为牺牲帧
    pub fn is_evictable(&self, frame: FrameId, protect: Option<FrameId>) -> bool {
        Some(frame) != protect && self.frames.get(frame).is_some_and(|f| !f.shared)
    }

    /// 清除引用位，返回清除前的值
    pub fn clear_referenced(&mut self, frame: FrameId) -> bool {
        match self.frames.get_mut(frame) {
            Some(f) => core::mem::replace(&mut f.referenced, false),
            None => false,
        }
    }

    /// 记录一次访问：置引用位并更新时间戳
    pub fn touch(&mut self, frame: FrameId) {
        self.ticks += 1;
        let now = self.ticks;
        if let Some(f) = self.frames.get_mut(frame) {
            f.referenced = true;
            f.last_used = now;
        }
    }

    /// 把帧交给 `pid` 的虚拟页 `vpn`，视为一次访问
    pub fn assign(&mut self, frame: FrameId, pid: Pid, vpn: Vpn) {
        if let Some(f) = self.frames.get_mut(frame) {
            f.owner = Some(pid);
            f.vpn = vpn;
        }
        self.touch(frame);
    }

    /// 标记为共享帧，此后永不换出
    pub fn mark_shared(&mut self, frame: FrameId) {
        if let Some(f) = self.frames.get_mut(frame) {
            f.shared = true;
        }
    }

    /// 释放 `pid` 的虚拟页 `vpn` 独占的帧
    ///
    /// 帧表记录必须与页表一致，且帧不能已经空闲。
    pub fn release(&mut self, frame: FrameId, pid: Pid, vpn: Vpn) -> VmResult<()> {
        let Some(f) = self.frames.get_mut(frame) else {
            log::error!("vmm: release of nonexistent frame {}", frame);
            return Err(VmError::FrameOwnershipMismatch { frame });
        };
        if f.is_free() {
            log::error!("vmm: frame {} released twice (pid {}, vpn {})", frame, pid, vpn);
            return Err(VmError::FrameAlreadyFree { frame });
        }
        if f.shared || f.owner != Some(pid) || f.vpn != vpn {
            log::error!(
                "vmm: frame {} belongs to {:?}/{}, not pid {} vpn {}",
                frame,
                f.owner,
                f.vpn,
                pid,
                vpn
            );
            return Err(VmError::FrameOwnershipMismatch { frame });
        }
        *f = PhysicalFrame::default();
        Ok(())
    }

    /// 释放共享帧
    pub fn release_shared(&mut self, frame: FrameId) -> VmResult<()> {
        match self.frames.get_mut(frame) {
            Some(f) if f.shared => {
                *f = PhysicalFrame::default();
                Ok(())
            }
            Some(f) if f.is_free() => {
                log::error!("vmm: shared frame {} released twice", frame);
                Err(VmError::FrameAlreadyFree { frame })
            }
            _ => {
                log::error!("vmm: frame {} is not a shared frame", frame);
                Err(VmError::FrameOwnershipMismatch { frame })
            }
        }
    }

    /// `pid` 独占的所有帧，按帧号排列：(帧号, 虚拟页号)
    pub fn owned_by(&self, pid: Pid) -> Vec<(FrameId, Vpn)> {
        self.iter()
            .filter(|(_, f)| !f.shared && f.owner == Some(pid))
            .map(|(id, f)| (id, f.vpn))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_and_release() {
        let mut table = FrameTable::new(4);
        assert_eq!(table.first_free(), Some(0));
        table.assign(0, 1, 5);
        assert_eq!(table.first_free(), Some(1));
        assert_eq!(table.owned_by(1), alloc::vec![(0, 5)]);
        assert!(table.get(0).is_some_and(|f| f.referenced));

        assert_eq!(
            table.release(0, 2, 5),
            Err(VmError::FrameOwnershipMismatch { frame: 0 })
        );
        assert_eq!(
            table.release(0, 1, 6),
            Err(VmError::FrameOwnershipMismatch { frame: 0 })
        );
        assert_eq!(table.release(0, 1, 5), Ok(()));
        assert_eq!(
            table.release(0, 1, 5),
            Err(VmError::FrameAlreadyFree { frame: 0 })
        );
        assert_eq!(table.free_count(), 4);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut table = FrameTable::new(3);
        table.assign(2, 1, 0);
        table.assign(0, 1, 1);
        table.touch(2);
        let stamp = |id| table.get(id).map(|f| f.last_used).unwrap_or(0);
        assert!(stamp(0) < stamp(2));
    }

    #[test]
    fn test_shared_frames_are_not_evictable() {
        let mut table = FrameTable::new(3);
        table.assign(1, 1, 0);
        table.mark_shared(1);
        assert!(!table.is_evictable(1, None));
        assert!(!table.is_evictable(0, Some(0)));
        assert!(table.is_evictable(2, Some(0)));
        assert_eq!(table.shared_count(), 1);
        assert!(table.owned_by(1).is_empty());

        assert_eq!(
            table.release(1, 1, 0),
            Err(VmError::FrameOwnershipMismatch { frame: 1 })
        );
        assert_eq!(table.release_shared(1), Ok(()));
        assert_eq!(
            table.release_shared(1),
            Err(VmError::FrameAlreadyFree { frame: 1 })
        );
    }
}
