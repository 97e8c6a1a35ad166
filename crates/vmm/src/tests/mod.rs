//! 端到端场景测试
//!
//! 用 `test-support` 的 Mock 组装出完整的 [`Vmm`]，验证缺页、置换、fork、
//! 共享段和回收在多个进程之间的行为。

extern crate std;

mod shared;

use crate::image::{ImageStore, NOFF_HEADER_SIZE, NOFF_MAGIC, NoffHeader, ProgramImage, Segment};
use crate::machine::Machine;
use crate::page_table::PageTableEntry;
use crate::sched::Scheduler;
use crate::{Pid, UnitId, VmConfig, Vmm};
use alloc::sync::Arc;
use alloc::vec::Vec;
use std::sync::{Mutex, MutexGuard};
use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::image::{MockImage, MockImageStore};
use test_support::mock::machine::MockMachine;
use test_support::mock::scheduler::MockScheduler;

/// 中断状态是全局的，使用 [`Vmm`] 的测试串行执行
static SERIAL: Mutex<()> = Mutex::new(());

struct TestArch;

static TEST_ARCH: TestArch = TestArch;

impl sync::ArchOps for TestArch {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
    }

    fn interrupt_enable_mask(&self) -> usize {
        MOCK_ARCH_OPS.interrupt_enable_mask()
    }
}

impl Machine for MockMachine {
    fn memory_size(&self) -> usize {
        self.size()
    }

    fn read_physical(&self, offset: usize, buf: &mut [u8]) {
        self.read(offset, buf);
    }

    fn write_physical(&mut self, offset: usize, bytes: &[u8]) {
        self.write(offset, bytes);
    }

    fn install_translation(&mut self, pid: Pid, table: &[PageTableEntry]) {
        self.install(pid, table.iter().map(PageTableEntry::resident_frame).collect());
    }
}

impl ProgramImage for MockImage {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        Ok(MockImage::read_at(self, offset, buf))
    }
}

impl ImageStore for MockImageStore {
    fn open(&self, name: &str) -> Option<Arc<dyn ProgramImage>> {
        MockImageStore::open(self, name).map(|image| Arc::new(image) as Arc<dyn ProgramImage>)
    }
}

impl Scheduler for MockScheduler {
    fn now(&self) -> u64 {
        MockScheduler::now(self)
    }

    fn current_pid(&self) -> Pid {
        MockScheduler::current_pid(self)
    }

    fn current_unit(&self) -> UnitId {
        MockScheduler::current_unit(self)
    }

    fn park_current_until(&self, wake_at: u64) {
        self.park(wake_at);
    }

    fn wake(&self, unit: UnitId) {
        MockScheduler::wake(self, unit);
    }
}

/// 测试用的一整套协作者
pub(crate) struct Harness {
    pub vmm: Vmm<MockMachine>,
    pub images: Arc<MockImageStore>,
    pub sched: Arc<MockScheduler>,
    _serial: MutexGuard<'static, ()>,
}

impl Harness {
    /// 按配置组装，物理内存恰好容纳所有帧；当前执行单元为进程 1 的 1 号单元
    pub fn new(config: VmConfig) -> Self {
        let serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { sync::register_arch_ops(&TEST_ARCH) };
        let images = Arc::new(MockImageStore::new());
        let sched = Arc::new(MockScheduler::new());
        sched.set_current(1, 1);
        let vmm = Vmm::new(
            config,
            MockMachine::new(config.memory_size()),
            images.clone(),
            sched.clone(),
        )
        .expect("valid config");
        Self {
            vmm,
            images,
            sched,
            _serial: serial,
        }
    }

    /// 登记一个可执行文件
    pub fn add_program(&self, name: &str, image: Vec<u8>) {
        self.images.insert(name, image);
    }

    /// 读进程 `pid` 的虚拟内存
    pub fn read(&mut self, pid: Pid, vaddr: usize, len: usize) -> Vec<u8> {
        let mut buf = alloc::vec![0u8; len];
        self.vmm.read_virtual(pid, vaddr, &mut buf).expect("read");
        buf
    }

    /// 虚拟页当前映射的帧
    pub fn frame_of(&self, pid: Pid, vpn: usize) -> Option<usize> {
        self.vmm
            .space(pid)
            .and_then(|space| space.entry(vpn))
            .and_then(PageTableEntry::resident_frame)
    }
}

/// 代码段可辨认的字节：第 i 个字节为 `(i % 251) + 1`
pub(crate) fn code_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

/// 组装一个 NOFF 可执行文件：代码段从虚拟地址 0 开始，紧接着数据段和未初始化段
pub(crate) fn program(code: &[u8], data: &[u8], bss: u32) -> Vec<u8> {
    let code_len = code.len() as u32;
    let data_len = data.len() as u32;
    let header = NoffHeader {
        magic: NOFF_MAGIC,
        code: Segment {
            virtual_addr: 0,
            in_file_addr: NOFF_HEADER_SIZE as u32,
            size: code_len,
        },
        init_data: Segment {
            virtual_addr: code_len,
            in_file_addr: NOFF_HEADER_SIZE as u32 + code_len,
            size: data_len,
        },
        uninit_data: Segment {
            virtual_addr: code_len + data_len,
            in_file_addr: 0,
            size: bss,
        },
    };
    let mut image = header.to_bytes().to_vec();
    image.extend_from_slice(code);
    image.extend_from_slice(data);
    image
}

/// 300 字节代码、60 字节数据、30 字节未初始化数据，
/// 加上默认的 1024 字节栈共 12 页
pub(crate) fn standard_program() -> Vec<u8> {
    program(&code_bytes(300), &[0xd0; 60], 30)
}

/// 4 个物理帧的小机器
pub(crate) fn small_config(policy: crate::PolicyKind) -> VmConfig {
    VmConfig {
        num_frames: 4,
        ..VmConfig::with_policy(policy)
    }
}
