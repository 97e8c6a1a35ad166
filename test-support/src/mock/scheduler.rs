//! 调度器的 Mock 实现
//!
//! 使用 `sync::SpinLock` 保存记录，因此使用前必须已注册 `sync::ArchOps`。

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use sync::SpinLock;

/// Mock 的调度器
///
/// 维护虚拟时钟和当前执行单元；"挂起"和"唤醒"只做记录。
pub struct MockScheduler {
    now: AtomicU64,
    current_pid: AtomicUsize,
    current_unit: AtomicUsize,
    parked: SpinLock<Vec<(usize, u64)>>,
    woken: SpinLock<Vec<usize>>,
}

impl MockScheduler {
    pub const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
            current_pid: AtomicUsize::new(0),
            current_unit: AtomicUsize::new(0),
            parked: SpinLock::new(Vec::new()),
            woken: SpinLock::new(Vec::new()),
        }
    }

    /// 切换当前运行的进程和执行单元
    pub fn set_current(&self, pid: usize, unit: usize) {
        self.current_pid.store(pid, Ordering::SeqCst);
        self.current_unit.store(unit, Ordering::SeqCst);
    }

    pub fn advance(&self, ticks: u64) -> u64 {
        self.now.fetch_add(ticks, Ordering::SeqCst) + ticks
    }

    pub fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    pub fn current_pid(&self) -> usize {
        self.current_pid.load(Ordering::SeqCst)
    }

    pub fn current_unit(&self) -> usize {
        self.current_unit.load(Ordering::SeqCst)
    }

    /// 记录当前执行单元被挂起到 `wake_at`
    pub fn park(&self, wake_at: u64) {
        let unit = self.current_unit();
        self.parked.lock().push((unit, wake_at));
    }

    pub fn wake(&self, unit: usize) {
        self.woken.lock().push(unit);
    }

    /// 所有挂起记录 (执行单元, 唤醒时间)
    pub fn parked(&self) -> Vec<(usize, u64)> {
        self.parked.lock().clone()
    }

    pub fn woken(&self) -> Vec<usize> {
        self.woken.lock().clone()
    }
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::new()
    }
}
