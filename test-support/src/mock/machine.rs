//! 模拟机器（物理内存 + 当前页表）的 Mock 实现
//!
//! 注意：这里不直接依赖 `vmm` crate（避免循环依赖）。
//! `vmm` crate 在 `cfg(test)` 下为这些类型实现其 trait（例如 `Machine`）。

use alloc::vec;
use alloc::vec::Vec;

/// Mock 的模拟机器
///
/// 物理内存是一段字节数组；"安装页表"只记录页表快照。
pub struct MockMachine {
    memory: Vec<u8>,
    installed_pid: Option<usize>,
    installed_frames: Vec<Option<usize>>,
    install_count: usize,
}

impl MockMachine {
    pub fn new(memory_size: usize) -> Self {
        Self {
            memory: vec![0u8; memory_size],
            installed_pid: None,
            installed_frames: Vec::new(),
            install_count: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.memory[offset..offset + buf.len()]);
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.memory[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// 记录一次页表安装：每一项是该虚拟页当前映射的物理帧
    pub fn install(&mut self, pid: usize, frames: Vec<Option<usize>>) {
        self.installed_pid = Some(pid);
        self.installed_frames = frames;
        self.install_count += 1;
    }

    pub fn installed_pid(&self) -> Option<usize> {
        self.installed_pid
    }

    pub fn installed_frames(&self) -> &[Option<usize>] {
        &self.installed_frames
    }

    pub fn install_count(&self) -> usize {
        self.install_count
    }

    /// 直接查看物理内存（测试断言用）
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }
}
