//! 地址空间模块
//!
//! 一个用户进程的全部虚拟页映射和后备存储：页表、交换区、可执行文件名和文件头。
//! 地址空间本身不碰帧表；取帧、换出他人页面、释放帧都由 [`crate::Vmm`] 协调，
//! 这里只负责本进程页面内容的保存和装入。

mod paging;

pub use paging::PageSource;

use crate::config::{LoadMode, VmConfig};
use crate::error::{VmError, VmResult};
use crate::image::{ImageStore, NOFF_HEADER_SIZE, NoffHeader};
use crate::page_table::{PageTable, PageTableEntry, PteFlags};
use crate::swap::SwapStore;
use crate::{Pid, Vpn};
use alloc::string::{String, ToString};

/// 用户程序开始运行时的寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRegisters {
    /// 程序计数器
    pub pc: usize,
    /// 下一条指令地址（延迟槽）
    pub next_pc: usize,
    /// 栈指针
    pub sp: usize,
}

/// 一个进程的地址空间
#[derive(Debug)]
pub struct AddressSpace {
    pid: Pid,
    /// 可执行文件名，每次读取时重新打开
    image_name: String,
    header: NoffHeader,
    page_size: usize,
    table: PageTable,
    swap: SwapStore,
}

impl AddressSpace {
    /// 打开可执行文件并解析文件头，返回前关闭文件
    pub fn load_header(images: &dyn ImageStore, name: &str) -> VmResult<NoffHeader> {
        let image = images.open(name).ok_or(VmError::ImageNotFound)?;
        let mut bytes = [0u8; NOFF_HEADER_SIZE];
        let read = image
            .read_at(0, &mut bytes)
            .map_err(|_| VmError::ImageReadFailed)?;
        if read < NOFF_HEADER_SIZE {
            log::warn!("vmm: {} is too short for an executable header", name);
            return Err(VmError::BadExecutableFormat);
        }
        NoffHeader::parse(&bytes)
    }

    /// 按文件头创建地址空间，所有页都未映射
    ///
    /// 立即装载模式下不分配交换区。
    pub fn new(pid: Pid, image_name: &str, header: NoffHeader, config: &VmConfig) -> Self {
        let page_count = header.page_count(config.user_stack_size, config.page_size);
        let swap = match config.load_mode {
            LoadMode::Demand => SwapStore::new(page_count, config.page_size),
            LoadMode::Eager => SwapStore::detached(),
        };
        log::debug!(
            "vmm: address space for pid {} from {} ({} pages)",
            pid,
            image_name,
            page_count
        );
        Self {
            pid,
            image_name: image_name.to_string(),
            header,
            page_size: config.page_size,
            table: PageTable::new(page_count),
            swap,
        }
    }

    /// 为子进程 `child` 复制页表的形状
    ///
    /// 共享页直接指向同一个物理帧；其余页先全部置为未映射，只保留只读标志，
    /// 内容由调用方逐页复制。交换区大小相同、内容清零。
    pub(crate) fn fork_shape(&self, child: Pid) -> Self {
        let mut table = PageTable::new(self.table.len());
        for (vpn, entry) in self.table.iter() {
            if let Some(slot) = table.get_mut(vpn) {
                if entry.is_shared() {
                    *slot = *entry;
                } else {
                    slot.flags = entry.flags & PteFlags::READ_ONLY;
                }
            }
        }
        let swap = match self.swap.pages() {
            0 => SwapStore::detached(),
            pages => SwapStore::new(pages, self.page_size),
        };
        Self {
            pid: child,
            image_name: self.image_name.clone(),
            header: self.header,
            page_size: self.page_size,
            table,
            swap,
        }
    }

    /// 所属进程
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// 可执行文件名
    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    /// 页数
    pub fn page_count(&self) -> usize {
        self.table.len()
    }

    /// 页表
    pub fn page_table(&self) -> &PageTable {
        &self.table
    }

    /// 虚拟页 `vpn` 的表项
    pub fn entry(&self, vpn: Vpn) -> Option<&PageTableEntry> {
        self.table.get(vpn)
    }

    pub(crate) fn entry_mut(&mut self, vpn: Vpn) -> Option<&mut PageTableEntry> {
        self.table.get_mut(vpn)
    }

    pub(crate) fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.table
    }

    /// 交换区
    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    pub(crate) fn swap_mut(&mut self) -> &mut SwapStore {
        &mut self.swap
    }

    /// 用户程序的初始寄存器：从地址 0 开始执行，栈顶留出 16 字节
    pub fn initial_registers(&self) -> UserRegisters {
        UserRegisters {
            pc: 0,
            next_pc: 4,
            sp: self.page_count() * self.page_size - 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{NOFF_MAGIC, Segment};

    fn header() -> NoffHeader {
        NoffHeader {
            magic: NOFF_MAGIC,
            code: Segment {
                virtual_addr: 0,
                in_file_addr: 40,
                size: 300,
            },
            ..NoffHeader::default()
        }
    }

    #[test]
    fn test_new_space_is_unmapped() {
        let space = AddressSpace::new(3, "prog", header(), &VmConfig::default());
        // (300 + 1024) / 128 向上取整
        assert_eq!(space.page_count(), 11);
        assert_eq!(space.swap().pages(), 11);
        assert!(space.page_table().iter().all(|(_, e)| *e == PageTableEntry::empty()));
        assert_eq!(
            space.initial_registers(),
            UserRegisters {
                pc: 0,
                next_pc: 4,
                sp: 11 * 128 - 16
            }
        );
    }

    #[test]
    fn test_eager_space_has_no_swap() {
        let config = VmConfig {
            load_mode: LoadMode::Eager,
            ..VmConfig::default()
        };
        let space = AddressSpace::new(1, "prog", header(), &config);
        assert_eq!(space.swap().pages(), 0);
    }

    #[test]
    fn test_fork_shape_keeps_shared_and_read_only() {
        let mut parent = AddressSpace::new(1, "prog", header(), &VmConfig::default());
        if let Some(entry) = parent.entry_mut(0) {
            entry.map(4);
            entry.flags.insert(PteFlags::DIRTY | PteFlags::READ_ONLY);
        }
        parent.page_table_mut().push(PageTableEntry::shared(9));

        let child = parent.fork_shape(2);
        assert_eq!(child.pid(), 2);
        assert_eq!(child.page_count(), parent.page_count());
        assert_eq!(child.entry(0).map(|e| e.flags), Some(PteFlags::READ_ONLY));
        assert_eq!(child.entry(0).and_then(|e| e.frame), None);
        assert_eq!(child.entry(11), Some(&PageTableEntry::shared(9)));
        assert_eq!(child.image_name(), "prog");
    }

    #[test]
    fn test_page_out_of_unmapped_page_fails() {
        let machine = test_support::mock::machine::MockMachine::new(4 * 128);
        let mut space = AddressSpace::new(1, "prog", header(), &VmConfig::default());
        if let Some(entry) = space.entry_mut(1) {
            entry.map(2);
            entry.unmap();
        }
        let before = space.entry(1).copied();

        assert_eq!(space.page_out(1, &machine), Err(VmError::PageNotMapped { pid: 1, vpn: 1 }));
        assert_eq!(space.entry(1).copied(), before);
        assert!(before.is_some_and(|e| e.is_loaded() && !e.is_valid()));
        assert_eq!(space.page_out(0, &machine), Err(VmError::PageNotMapped { pid: 1, vpn: 0 }));
        assert_eq!(space.page_out(99, &machine), Err(VmError::PageNotMapped { pid: 1, vpn: 99 }));
    }
}
