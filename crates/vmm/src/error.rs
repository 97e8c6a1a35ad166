//! 虚拟内存管理中可能发生的错误
//!
//! 本子系统中的错误都不是瞬时错误：要么是配置/调用方错误，
//! 要么是内部不变式被破坏，因此任何地方都不做重试。

use crate::{FrameId, Pid, Vpn};

/// 虚拟内存操作中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 可执行文件头的魔数不匹配（字节序翻转后也不匹配）或文件头不完整
    BadExecutableFormat,
    /// 找不到指定名字的可执行文件
    ImageNotFound,
    /// 读取可执行文件失败
    ImageReadFailed,
    /// 虚拟页号超出了地址空间的页数
    InvalidVirtualPage {
        /// 出错的虚拟页号
        vpn: Vpn,
        /// 地址空间的页数
        page_count: usize,
    },
    /// 物理内存耗尽
    OutOfPhysicalMemory,
    /// 访问的虚拟页当前没有有效映射（由 MMU 路径返回，调用方应处理缺页）
    PageFault {
        /// 触发缺页的虚拟地址
        vaddr: usize,
    },
    /// 写只读页
    ReadOnlyPage {
        /// 出错的虚拟页号
        vpn: Vpn,
    },
    /// 没有该进程的地址空间
    NoSuchProcess(Pid),
    /// 该进程号已经有地址空间
    PidInUse(Pid),
    /// 配置不合法
    InvalidConfig,
    /// 内部错误：对没有映射的页执行换出
    PageNotMapped {
        /// 地址空间所属进程
        pid: Pid,
        /// 虚拟页号
        vpn: Vpn,
    },
    /// 内部错误：没有任何可以换出的物理帧
    NoEvictableFrame,
    /// 内部错误：需要换出的页在交换区中没有槽位
    NoSwapSlot {
        /// 地址空间所属进程
        pid: Pid,
        /// 虚拟页号
        vpn: Vpn,
    },
    /// 内部错误：物理帧记录的属主进程已不存在
    DanglingFrameOwner {
        /// 物理帧号
        frame: FrameId,
        /// 记录中的属主
        pid: Pid,
    },
    /// 内部错误：帧表记录与页表不一致
    FrameOwnershipMismatch {
        /// 物理帧号
        frame: FrameId,
    },
    /// 内部错误：重复释放物理帧
    FrameAlreadyFree {
        /// 物理帧号
        frame: FrameId,
    },
}

impl VmError {
    /// 是否属于内部不变式被破坏的错误
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            VmError::PageNotMapped { .. }
                | VmError::NoEvictableFrame
                | VmError::NoSwapSlot { .. }
                | VmError::DanglingFrameOwner { .. }
                | VmError::FrameOwnershipMismatch { .. }
                | VmError::FrameAlreadyFree { .. }
        )
    }
}

impl core::fmt::Display for VmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VmError::BadExecutableFormat => write!(f, "bad executable format"),
            VmError::ImageNotFound => write!(f, "executable not found"),
            VmError::ImageReadFailed => write!(f, "failed to read executable"),
            VmError::InvalidVirtualPage { vpn, page_count } => {
                write!(f, "virtual page {} out of range (page count {})", vpn, page_count)
            }
            VmError::OutOfPhysicalMemory => write!(f, "out of physical memory"),
            VmError::PageFault { vaddr } => write!(f, "page fault at {:#x}", vaddr),
            VmError::ReadOnlyPage { vpn } => write!(f, "write to read-only page {}", vpn),
            VmError::NoSuchProcess(pid) => write!(f, "no address space for pid {}", pid),
            VmError::PidInUse(pid) => write!(f, "pid {} already has an address space", pid),
            VmError::InvalidConfig => write!(f, "invalid memory configuration"),
            VmError::PageNotMapped { pid, vpn } => {
                write!(f, "page {} of pid {} is not mapped", vpn, pid)
            }
            VmError::NoEvictableFrame => write!(f, "no evictable frame"),
            VmError::NoSwapSlot { pid, vpn } => {
                write!(f, "page {} of pid {} has no swap slot", vpn, pid)
            }
            VmError::DanglingFrameOwner { frame, pid } => {
                write!(f, "frame {} owned by dead pid {}", frame, pid)
            }
            VmError::FrameOwnershipMismatch { frame } => {
                write!(f, "frame {} ownership disagrees with page table", frame)
            }
            VmError::FrameAlreadyFree { frame } => write!(f, "frame {} released twice", frame),
        }
    }
}

/// 虚拟内存操作的结果类型
pub type VmResult<T> = Result<T, VmError>;
