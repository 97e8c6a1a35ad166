//! 虚拟内存管理器
//!
//! [`Vmm`] 持有所有进程共享的状态：物理帧表、置换策略、全部地址空间、
//! 缺页等待队列和统计，并协调缺页、fork、共享段挂载和进程退出。
//!
//! ## 临界区
//!
//! 取帧、换出牺牲帧、转移帧的归属都在 [`IntrGuard`] 的作用域内完成，
//! 其间没有挂起点。唯一的挂起点在缺页（或 fork 复制）结束时：
//! 此时帧已经装好内容并登记了属主，切换到其他执行单元不会看到半更新的帧。
//!
//! ## 换出
//!
//! 牺牲帧可能属于任何一个进程（包括正在缺页的进程自己），
//! 由其属主的地址空间把内容保存到属主自己的交换区。

use crate::address_space::{AddressSpace, PageSource};
use crate::config::{LoadMode, PolicyKind, VmConfig};
use crate::error::{VmError, VmResult};
use crate::frame_table::FrameTable;
use crate::image::ImageStore;
use crate::machine::Machine;
use crate::page_table::{PageTableEntry, PteFlags};
use crate::policy::ReplacementPolicy;
use crate::sched::{FaultWaitQueue, Scheduler};
use crate::stats::VmStats;
use crate::{FrameId, Pid, Vpn};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use sync::IntrGuard;

/// 虚拟内存管理器
pub struct Vmm<M: Machine> {
    config: VmConfig,
    machine: M,
    frames: FrameTable,
    policy: ReplacementPolicy,
    spaces: BTreeMap<Pid, AddressSpace>,
    images: Arc<dyn ImageStore>,
    scheduler: Arc<dyn Scheduler>,
    waiters: FaultWaitQueue,
    stats: VmStats,
    /// 页表当前安装在机器中的进程
    active: Option<Pid>,
}

impl<M: Machine> Vmm<M> {
    /// 创建管理器，配置必须与机器的物理内存大小相符
    pub fn new(
        config: VmConfig,
        machine: M,
        images: Arc<dyn ImageStore>,
        scheduler: Arc<dyn Scheduler>,
    ) -> VmResult<Self> {
        config.validate(machine.memory_size())?;
        Ok(Self {
            config,
            machine,
            frames: FrameTable::new(config.num_frames),
            policy: ReplacementPolicy::new(config.policy, config.random_seed),
            spaces: BTreeMap::new(),
            images,
            scheduler,
            waiters: FaultWaitQueue::new(),
            stats: VmStats::default(),
            active: None,
        })
    }

    /// 配置
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// 置换策略
    pub fn policy_kind(&self) -> PolicyKind {
        self.policy.kind()
    }

    /// 模拟机器
    pub fn machine(&self) -> &M {
        &self.machine
    }

    /// 模拟机器（可变）
    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    /// 物理帧表
    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    /// 统计
    pub fn stats(&self) -> VmStats {
        self.stats
    }

    /// 进程 `pid` 的地址空间
    pub fn space(&self, pid: Pid) -> Option<&AddressSpace> {
        self.spaces.get(&pid)
    }

    /// 页表当前安装在机器中的进程
    pub fn active(&self) -> Option<Pid> {
        self.active
    }

    /// 缺页等待队列
    pub fn waiters(&self) -> &FaultWaitQueue {
        &self.waiters
    }

    // ------------------------------------------------------------------
    // 生命周期
    // ------------------------------------------------------------------

    /// 为进程 `pid` 装载可执行文件 `name`
    pub fn create(&mut self, pid: Pid, name: &str) -> VmResult<()> {
        if self.spaces.contains_key(&pid) {
            return Err(VmError::PidInUse(pid));
        }
        let header = AddressSpace::load_header(self.images.as_ref(), name)?;
        self.install_space(AddressSpace::new(pid, name, header, &self.config))
    }

    /// 用可执行文件 `name` 替换进程 `pid` 的地址空间并激活
    ///
    /// 新文件头解析失败时旧地址空间保持不变。
    pub fn exec(&mut self, pid: Pid, name: &str) -> VmResult<()> {
        if !self.spaces.contains_key(&pid) {
            return Err(VmError::NoSuchProcess(pid));
        }
        let header = AddressSpace::load_header(self.images.as_ref(), name)?;
        self.exit(pid)?;
        self.install_space(AddressSpace::new(pid, name, header, &self.config))?;
        self.activate(pid)
    }

    fn install_space(&mut self, space: AddressSpace) -> VmResult<()> {
        let pid = space.pid();
        let page_count = space.page_count();
        self.spaces.insert(pid, space);
        if self.config.load_mode == LoadMode::Eager {
            for vpn in 0..page_count {
                if let Err(err) = self.service_fault(pid, vpn) {
                    self.roll_back_space(pid);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// 撤销未完成的地址空间，回滚本身出错时只记录日志
    fn roll_back_space(&mut self, pid: Pid) {
        if let Err(err) = self.exit(pid) {
            log::error!("vmm: rollback of pid {} failed: {}", pid, err);
        }
    }

    fn roll_back_frame(&mut self, frame: FrameId, pid: Pid, vpn: Vpn) {
        if let Err(err) = self.frames.release(frame, pid, vpn) {
            log::error!("vmm: rollback of frame {} for pid {} failed: {}", frame, pid, err);
        }
    }

    /// 销毁进程 `pid` 的地址空间
    ///
    /// 释放它独占的每个帧；共享帧只有在没有其他地址空间映射时才释放。
    /// 交换区和页表直接丢弃，不回写。进程是活动进程时机器里换上空页表。
    /// 遇到帧表不一致时仍会继续释放其余帧，返回第一个错误。
    pub fn exit(&mut self, pid: Pid) -> VmResult<()> {
        let _guard = IntrGuard::new();
        let space = self.spaces.remove(&pid).ok_or(VmError::NoSuchProcess(pid))?;
        if self.active == Some(pid) {
            // 已释放的帧不能再通过机器里的旧页表访问
            self.machine.install_translation(pid, &[]);
            self.active = None;
        }

        let mut result = Ok(());
        for (vpn, entry) in space.page_table().iter() {
            let Some(frame) = entry.resident_frame() else {
                continue;
            };
            let released = if entry.is_shared() {
                if self.spaces.values().any(|other| maps_shared(other, frame)) {
                    continue;
                }
                self.frames.release_shared(frame)
            } else {
                self.frames.release(frame, pid, vpn)
            };
            if let Err(err) = released {
                result = result.and(Err(err));
            }
        }
        log::debug!("vmm: pid {} exited, {} frames free", pid, self.frames.free_count());
        result
    }

    /// 把进程 `pid` 的页表安装到机器中（上下文切换）
    pub fn activate(&mut self, pid: Pid) -> VmResult<()> {
        let space = self.spaces.get(&pid).ok_or(VmError::NoSuchProcess(pid))?;
        self.machine.install_translation(pid, space.page_table().entries());
        self.active = Some(pid);
        Ok(())
    }

    fn refresh_translation(&mut self, pid: Pid) {
        if self.active != Some(pid) {
            return;
        }
        if let Some(space) = self.spaces.get(&pid) {
            self.machine.install_translation(pid, space.page_table().entries());
        }
    }

    // ------------------------------------------------------------------
    // 缺页
    // ------------------------------------------------------------------

    /// 处理当前进程在虚拟地址 `vaddr` 上的缺页
    pub fn page_fault(&mut self, vaddr: usize) -> VmResult<()> {
        let pid = self.scheduler.current_pid();
        self.handle_fault(pid, vaddr)
    }

    /// 处理进程 `pid` 在虚拟地址 `vaddr` 上的缺页
    ///
    /// 页已经有效时什么也不做。否则取帧、清零、装入内容，
    /// 然后把当前执行单元挂起到 `now + fault_latency`。
    pub fn handle_fault(&mut self, pid: Pid, vaddr: usize) -> VmResult<()> {
        let (vpn, entry) = self.lookup(pid, vaddr)?;
        if entry.is_valid() {
            return Ok(());
        }
        self.service_fault(pid, vpn)?;
        self.stats.page_faults += 1;
        self.park_current();
        Ok(())
    }

    fn lookup(&self, pid: Pid, vaddr: usize) -> VmResult<(Vpn, PageTableEntry)> {
        let space = self.spaces.get(&pid).ok_or(VmError::NoSuchProcess(pid))?;
        let vpn = vaddr / self.config.page_size;
        space
            .entry(vpn)
            .map(|entry| (vpn, *entry))
            .ok_or(VmError::InvalidVirtualPage {
                vpn,
                page_count: space.page_count(),
            })
    }

    /// 取帧并装入虚拟页，不挂起
    fn service_fault(&mut self, pid: Pid, vpn: Vpn) -> VmResult<()> {
        let _guard = IntrGuard::new();
        let frame = self.acquire_frame(pid, vpn, None)?;
        self.zero_frame(frame);

        let Some(space) = self.spaces.get_mut(&pid) else {
            self.roll_back_frame(frame, pid, vpn);
            return Err(VmError::NoSuchProcess(pid));
        };
        match space.load_page(vpn, frame, &mut self.machine, self.images.as_ref()) {
            Ok(PageSource::Swap) => self.stats.swap_ins += 1,
            Ok(PageSource::Image) => {}
            Err(err) => {
                self.roll_back_frame(frame, pid, vpn);
                return Err(err);
            }
        }
        log::debug!("vmm: pid {} vpn {} now in frame {}", pid, vpn, frame);
        self.refresh_translation(pid);
        Ok(())
    }

    fn park_current(&mut self) {
        let wake_at = self.scheduler.now() + self.config.fault_latency;
        let unit = self.scheduler.current_unit();
        self.waiters.push(wake_at, unit);
        self.scheduler.park_current_until(wake_at);
    }

    /// 唤醒所有到期的缺页执行单元，返回唤醒的数量
    pub fn wake_expired(&mut self, now: u64) -> usize {
        let units = self.waiters.pop_expired(now);
        for &unit in &units {
            self.scheduler.wake(unit);
        }
        units.len()
    }

    // ------------------------------------------------------------------
    // 取帧与换出
    // ------------------------------------------------------------------

    /// 为 `pid` 的虚拟页 `vpn` 取得一个物理帧，必要时换出牺牲帧
    ///
    /// `protect` 指定的帧不会被选为牺牲帧。返回的帧已登记到新属主名下，
    /// 内容未定义。
    fn acquire_frame(&mut self, pid: Pid, vpn: Vpn, protect: Option<FrameId>) -> VmResult<FrameId> {
        let _guard = IntrGuard::new();
        let frame = match self.policy.find_free(&self.frames) {
            Some(frame) => frame,
            None => {
                let victim = self.policy.select_victim(&mut self.frames, protect)?;
                self.evict(victim)?;
                victim
            }
        };
        self.frames.assign(frame, pid, vpn);
        Ok(frame)
    }

    /// 让牺牲帧的属主换出该页
    fn evict(&mut self, frame: FrameId) -> VmResult<()> {
        let Some(record) = self.frames.get(frame).copied() else {
            return Ok(());
        };
        let Some(owner) = record.owner else {
            return Ok(());
        };
        let Some(space) = self.spaces.get_mut(&owner) else {
            log::error!("vmm: victim frame {} owned by dead pid {}", frame, owner);
            return Err(VmError::DanglingFrameOwner { frame, pid: owner });
        };
        if space.entry(record.vpn).and_then(|e| e.resident_frame()) != Some(frame) {
            log::error!(
                "vmm: frame {} says pid {} vpn {}, page table disagrees",
                frame,
                owner,
                record.vpn
            );
            return Err(VmError::FrameOwnershipMismatch { frame });
        }
        if space.page_out(record.vpn, &self.machine)? {
            self.stats.swap_outs += 1;
        }
        self.stats.evictions += 1;
        self.refresh_translation(owner);
        Ok(())
    }

    fn zero_frame(&mut self, frame: FrameId) {
        let page_size = self.config.page_size;
        self.machine.write_physical(frame * page_size, &vec![0u8; page_size]);
    }

    // ------------------------------------------------------------------
    // fork
    // ------------------------------------------------------------------

    /// 把进程 `parent` 的地址空间复制给 `child`
    ///
    /// 共享页指向同一帧；父进程驻留的页复制到新帧（父进程的帧受保护），
    /// 子进程的副本是脏页；不驻留的页保持未映射，当时的交换区槽位一并复制。
    /// 复制的页计为缺页，有复制时当前执行单元挂起一次。失败时子进程被销毁。
    pub fn fork(&mut self, parent: Pid, child: Pid) -> VmResult<()> {
        if self.spaces.contains_key(&child) {
            return Err(VmError::PidInUse(child));
        }
        let shape = self
            .spaces
            .get(&parent)
            .ok_or(VmError::NoSuchProcess(parent))?
            .fork_shape(child);
        self.spaces.insert(child, shape);

        let copied = match self.copy_pages(parent, child) {
            Ok(copied) => copied,
            Err(err) => {
                self.roll_back_space(child);
                return Err(err);
            }
        };
        log::debug!("vmm: pid {} forked into {}, {} pages copied", parent, child, copied);
        if copied > 0 {
            self.stats.page_faults += copied;
            self.stats.frames_copied += copied;
            self.park_current();
        }
        Ok(())
    }

    fn copy_pages(&mut self, parent: Pid, child: Pid) -> VmResult<u64> {
        let _guard = IntrGuard::new();
        let page_size = self.config.page_size;
        let page_count = self
            .spaces
            .get(&parent)
            .ok_or(VmError::NoSuchProcess(parent))?
            .page_count();
        let mut buf = vec![0u8; page_size];
        let mut copied = 0;

        for vpn in 0..page_count {
            // 每一页都重新读取父进程的表项：前面的取帧可能换出了父进程的页
            let entry = self
                .spaces
                .get(&parent)
                .and_then(|space| space.entry(vpn))
                .copied()
                .ok_or(VmError::NoSuchProcess(parent))?;
            if entry.is_shared() {
                continue;
            }

            if let Some(parent_frame) = entry.resident_frame() {
                let frame = self.acquire_frame(child, vpn, Some(parent_frame))?;
                self.machine.read_physical(parent_frame * page_size, &mut buf);
                self.machine.write_physical(frame * page_size, &buf);
                let child_entry = self
                    .spaces
                    .get_mut(&child)
                    .and_then(|space| space.entry_mut(vpn))
                    .ok_or(VmError::NoSuchProcess(child))?;
                child_entry.map(frame);
                child_entry.flags.insert(PteFlags::DIRTY);
                copied += 1;
            } else if entry.is_loaded() {
                self.copy_swap_slot(parent, child, vpn)?;
            }
        }
        Ok(copied)
    }

    /// 把父进程交换区中 `vpn` 的内容复制给子进程，并把子进程的该页标记为装入过
    fn copy_swap_slot(&mut self, parent: Pid, child: Pid, vpn: Vpn) -> VmResult<()> {
        let mut child_space = self
            .spaces
            .remove(&child)
            .ok_or(VmError::NoSuchProcess(child))?;
        let copied = match self.spaces.get(&parent) {
            Some(space) => Ok(child_space.swap_mut().copy_slot_from(space.swap(), vpn)),
            None => Err(VmError::NoSuchProcess(parent)),
        };
        if matches!(copied, Ok(true)) {
            if let Some(entry) = child_space.entry_mut(vpn) {
                entry.flags.insert(PteFlags::LOADED);
            }
        }
        self.spaces.insert(child, child_space);
        if !copied? {
            log::error!("vmm: swapped page {} of pid {} has no slot to copy", vpn, parent);
            return Err(VmError::NoSwapSlot { pid: parent, vpn });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 共享内存段
    // ------------------------------------------------------------------

    /// 在进程 `pid` 的地址空间末尾挂载 `size` 字节的共享内存，返回起始虚拟地址
    ///
    /// 新页立即分配帧、清零并标记为共享，此后永不换出。
    pub fn attach_shared(&mut self, pid: Pid, size: usize) -> VmResult<usize> {
        let page_size = self.config.page_size;
        let pages = size.div_ceil(page_size);
        let start = self
            .spaces
            .get(&pid)
            .ok_or(VmError::NoSuchProcess(pid))?
            .page_count();

        let _guard = IntrGuard::new();
        if !self.policy.can_attach(&self.frames, pages) {
            log::warn!("vmm: no room for {} shared pages in pid {}", pages, pid);
            return Err(VmError::OutOfPhysicalMemory);
        }
        for vpn in start..start + pages {
            let frame = match self.acquire_frame(pid, vpn, None) {
                Ok(frame) => frame,
                Err(err) => {
                    self.detach_from(pid, start);
                    return Err(err);
                }
            };
            self.frames.mark_shared(frame);
            self.zero_frame(frame);
            if let Some(space) = self.spaces.get_mut(&pid) {
                space.page_table_mut().push(PageTableEntry::shared(frame));
            }
        }
        log::debug!("vmm: pid {} attached {} shared pages at vpn {}", pid, pages, start);
        self.refresh_translation(pid);
        Ok(start * page_size)
    }

    /// 撤销从 `start` 开始新挂载的共享页
    fn detach_from(&mut self, pid: Pid, start: Vpn) {
        let Some(space) = self.spaces.get_mut(&pid) else {
            return;
        };
        for (_, entry) in space.page_table().iter().skip(start) {
            if let Some(frame) = entry.resident_frame() {
                if let Err(err) = self.frames.release_shared(frame) {
                    log::error!(
                        "vmm: rollback of shared frame {} in pid {} failed: {}",
                        frame,
                        pid,
                        err
                    );
                }
            }
        }
        space.page_table_mut().truncate(start);
    }

    // ------------------------------------------------------------------
    // 访问
    // ------------------------------------------------------------------

    /// 把进程 `pid` 的虚拟地址翻译为物理地址，并记录一次访问
    ///
    /// 页不在内存中时返回 [`VmError::PageFault`]，由调用方处理缺页后重试。
    pub fn translate(&mut self, pid: Pid, vaddr: usize, write: bool) -> VmResult<usize> {
        let page_size = self.config.page_size;
        let vpn = vaddr / page_size;
        let space = self.spaces.get_mut(&pid).ok_or(VmError::NoSuchProcess(pid))?;
        let page_count = space.page_count();
        let entry = space
            .entry_mut(vpn)
            .ok_or(VmError::InvalidVirtualPage { vpn, page_count })?;
        let Some(frame) = entry.resident_frame() else {
            return Err(VmError::PageFault { vaddr });
        };
        if write && entry.is_read_only() {
            return Err(VmError::ReadOnlyPage { vpn });
        }
        entry.flags.insert(PteFlags::REFERENCED);
        if write {
            entry.flags.insert(PteFlags::DIRTY);
        }
        self.frames.touch(frame);
        Ok(frame * page_size + vaddr % page_size)
    }

    fn translate_or_fault(&mut self, pid: Pid, vaddr: usize, write: bool) -> VmResult<usize> {
        match self.translate(pid, vaddr, write) {
            Err(VmError::PageFault { .. }) => {
                self.handle_fault(pid, vaddr)?;
                self.translate(pid, vaddr, write)
            }
            other => other,
        }
    }

    /// 从进程 `pid` 的虚拟地址 `vaddr` 读取数据（跨页安全，必要时缺页）
    pub fn read_virtual(&mut self, pid: Pid, vaddr: usize, buf: &mut [u8]) -> VmResult<()> {
        let page_size = self.config.page_size;
        let mut done = 0;
        while done < buf.len() {
            let addr = vaddr + done;
            let paddr = self.translate_or_fault(pid, addr, false)?;
            let len = (page_size - addr % page_size).min(buf.len() - done);
            self.machine.read_physical(paddr, &mut buf[done..done + len]);
            done += len;
        }
        Ok(())
    }

    /// 向进程 `pid` 的虚拟地址 `vaddr` 写入数据（跨页安全，必要时缺页）
    pub fn write_virtual(&mut self, pid: Pid, vaddr: usize, bytes: &[u8]) -> VmResult<()> {
        let page_size = self.config.page_size;
        let mut done = 0;
        while done < bytes.len() {
            let addr = vaddr + done;
            let paddr = self.translate_or_fault(pid, addr, true)?;
            let len = (page_size - addr % page_size).min(bytes.len() - done);
            self.machine.write_physical(paddr, &bytes[done..done + len]);
            done += len;
        }
        Ok(())
    }

    /// 查询虚拟地址对应的物理地址，不触发缺页
    ///
    /// 越界或不在内存中时返回 `None`；否则置引用位。
    pub fn physical_address(&mut self, pid: Pid, vaddr: usize) -> Option<usize> {
        self.translate(pid, vaddr, false).ok()
    }

    /// 设置或清除虚拟页的只读标志
    pub fn set_read_only(&mut self, pid: Pid, vpn: Vpn, read_only: bool) -> VmResult<()> {
        let space = self.spaces.get_mut(&pid).ok_or(VmError::NoSuchProcess(pid))?;
        let page_count = space.page_count();
        let entry = space
            .entry_mut(vpn)
            .ok_or(VmError::InvalidVirtualPage { vpn, page_count })?;
        entry.flags.set(PteFlags::READ_ONLY, read_only);
        self.refresh_translation(pid);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 一致性检查
    // ------------------------------------------------------------------

    /// 检查帧表与所有页表是否一一对应
    ///
    /// 每个被独占的帧都必须被其属主的对应表项映射；每个有效的非共享表项
    /// 都必须指向登记在本进程名下的帧；共享表项必须指向共享帧。
    pub fn verify_frame_table(&self) -> VmResult<()> {
        for (frame, record) in self.frames.iter() {
            if record.shared {
                continue;
            }
            let Some(owner) = record.owner else {
                continue;
            };
            let space = self
                .spaces
                .get(&owner)
                .ok_or(VmError::DanglingFrameOwner { frame, pid: owner })?;
            match space.entry(record.vpn) {
                Some(entry) if !entry.is_shared() && entry.resident_frame() == Some(frame) => {}
                _ => return Err(VmError::FrameOwnershipMismatch { frame }),
            }
        }

        for (&pid, space) in &self.spaces {
            for (vpn, entry) in space.page_table().iter() {
                let Some(frame) = entry.resident_frame() else {
                    continue;
                };
                let record = self
                    .frames
                    .get(frame)
                    .ok_or(VmError::FrameOwnershipMismatch { frame })?;
                let consistent = if entry.is_shared() {
                    record.shared
                } else {
                    !record.shared && record.owner == Some(pid) && record.vpn == vpn
                };
                if !consistent {
                    return Err(VmError::FrameOwnershipMismatch { frame });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl<M: Machine> Vmm<M> {
    /// 直接修改帧表，用来构造不一致的状态
    pub(crate) fn frames_mut(&mut self) -> &mut FrameTable {
        &mut self.frames
    }

    pub(crate) fn space_mut(&mut self, pid: Pid) -> Option<&mut AddressSpace> {
        self.spaces.get_mut(&pid)
    }
}

fn maps_shared(space: &AddressSpace, frame: FrameId) -> bool {
    space
        .page_table()
        .iter()
        .any(|(_, entry)| entry.is_shared() && entry.resident_frame() == Some(frame))
}
