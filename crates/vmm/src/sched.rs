//! 调度器接口与缺页等待队列
//!
//! 缺页服务被建模为需要耗时的 I/O：服务完成后，缺页的执行单元按
//! "当前虚拟时间 + 缺页耗时" 排入等待队列并挂起，
//! 时钟推进后由 [`crate::Vmm::wake_expired`] 唤醒到期的执行单元。

use crate::{Pid, UnitId};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// 调度器中与内存管理相关的部分
pub trait Scheduler: Send + Sync {
    /// 当前虚拟时间
    fn now(&self) -> u64;

    /// 当前运行的进程
    fn current_pid(&self) -> Pid;

    /// 当前运行的执行单元
    fn current_unit(&self) -> UnitId;

    /// 挂起当前执行单元，直到在 `wake_at` 之后被唤醒
    fn park_current_until(&self, wake_at: u64);

    /// 唤醒执行单元
    fn wake(&self, unit: UnitId);
}

/// 按唤醒时间排序的等待队列
///
/// 唤醒时间相同的执行单元按入队顺序出队。
#[derive(Debug, Default)]
pub struct FaultWaitQueue {
    entries: BTreeMap<(u64, u64), UnitId>,
    seq: u64,
}

impl FaultWaitQueue {
    /// 创建空队列
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            seq: 0,
        }
    }

    /// 排入在 `wake_at` 唤醒的执行单元
    pub fn push(&mut self, wake_at: u64, unit: UnitId) {
        self.entries.insert((wake_at, self.seq), unit);
        self.seq += 1;
    }

    /// 取出所有唤醒时间不晚于 `now` 的执行单元
    pub fn pop_expired(&mut self, now: u64) -> Vec<UnitId> {
        let pending = self.entries.split_off(&(now.saturating_add(1), 0));
        let expired = core::mem::replace(&mut self.entries, pending);
        expired.into_values().collect()
    }

    /// 最早的唤醒时间
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.keys().next().map(|&(wake_at, _)| wake_at)
    }

    /// 等待中的执行单元数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 队列是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
