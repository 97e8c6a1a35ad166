//! 虚拟内存管理子系统
//!
//! 为模拟机器上的每个用户进程提供按需调页的地址空间：
//! 物理帧表、每进程交换区、可替换的页面置换策略、fork 时的地址空间复制、
//! 共享内存段挂载以及进程退出时的回收。
//!
//! # 协作者
//!
//! 通过 trait 与外部组件解耦，测试中由 `test-support` 的 Mock 实现：
//! - [`Machine`]: 物理内存读写、安装当前页表
//! - [`Scheduler`]: 虚拟时钟、当前执行单元、挂起与唤醒
//! - [`ImageStore`] / [`ProgramImage`]: 按名字打开可执行文件并按偏移读取
//!
//! 临界区由 [`sync::IntrGuard`] 提供，使用前必须调用 [`sync::register_arch_ops`]。
//!
//! # 入口
//!
//! 所有进程共享的状态（帧表、置换策略、等待队列、统计）都由一个 [`Vmm`] 持有，
//! 不存在全局可变状态。

#![no_std]

extern crate alloc;

mod config;
mod error;
mod machine;
mod stats;

pub mod address_space;
pub mod frame_table;
pub mod image;
pub mod manager;
pub mod page_table;
pub mod policy;
pub mod sched;
pub mod swap;

#[cfg(test)]
mod tests;

pub use address_space::{AddressSpace, UserRegisters};
pub use config::{LoadMode, PolicyKind, VmConfig};
pub use error::{VmError, VmResult};
pub use frame_table::{FrameTable, PhysicalFrame};
pub use image::{ImageStore, NoffHeader, ProgramImage, Segment};
pub use machine::Machine;
pub use manager::Vmm;
pub use page_table::{PageTable, PageTableEntry, PteFlags};
pub use policy::ReplacementPolicy;
pub use sched::{FaultWaitQueue, Scheduler};
pub use stats::VmStats;
pub use swap::SwapStore;

/// 进程号
pub type Pid = usize;

/// 调度器中的执行单元（线程）编号
pub type UnitId = usize;

/// 物理帧号
pub type FrameId = usize;

/// 虚拟页号
pub type Vpn = usize;
