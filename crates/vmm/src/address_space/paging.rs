//! 页面内容的换出与装入

use super::AddressSpace;
use crate::error::{VmError, VmResult};
use crate::image::ImageStore;
use crate::machine::Machine;
use crate::page_table::PteFlags;
use crate::{FrameId, Vpn};
use alloc::vec;

/// 页面内容的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    /// 从可执行文件装入（第一次装入）
    Image,
    /// 从交换区读回
    Swap,
}

impl AddressSpace {
    /// 换出虚拟页 `vpn`
    ///
    /// 表项必须有效。脏页先写回交换区并清除脏位，然后解除映射；
    /// 帧表由调用方更新。返回是否写了交换区。
    pub(crate) fn page_out<M: Machine + ?Sized>(&mut self, vpn: Vpn, machine: &M) -> VmResult<bool> {
        let pid = self.pid;
        let page_size = self.page_size;
        let (entry, frame) = match self.table.get_mut(vpn) {
            Some(entry) => match entry.resident_frame() {
                Some(frame) => (entry, frame),
                None => {
                    log::error!("vmm: page-out of unmapped page {} in pid {}", vpn, pid);
                    return Err(VmError::PageNotMapped { pid, vpn });
                }
            },
            None => {
                log::error!("vmm: page-out of nonexistent page {} in pid {}", vpn, pid);
                return Err(VmError::PageNotMapped { pid, vpn });
            }
        };

        let dirty = entry.is_dirty();
        if dirty {
            let Some(slot) = self.swap.slot_mut(vpn) else {
                log::error!("vmm: dirty page {} of pid {} has no swap slot", vpn, pid);
                return Err(VmError::NoSwapSlot { pid, vpn });
            };
            machine.read_physical(frame * page_size, slot);
            entry.flags.remove(PteFlags::DIRTY);
        }
        entry.unmap();
        log::trace!("vmm: pid {} vpn {} left frame {} (dirty: {})", pid, vpn, frame, dirty);
        Ok(dirty)
    }

    /// 把虚拟页 `vpn` 的内容装入已清零的物理帧 `frame`，并建立映射
    ///
    /// 从未装入过的页从可执行文件读取代码段和已初始化数据段的重叠部分，
    /// 其余字节保持为零；此时交换区还没有该页的内容，因此页被标记为脏。
    /// 装入过的页从交换区读回，是干净的。
    pub(crate) fn load_page<M: Machine + ?Sized>(
        &mut self,
        vpn: Vpn,
        frame: FrameId,
        machine: &mut M,
        images: &dyn ImageStore,
    ) -> VmResult<PageSource> {
        let page_size = self.page_size;
        let loaded = match self.table.get(vpn) {
            Some(entry) => entry.is_loaded(),
            None => {
                return Err(VmError::InvalidVirtualPage {
                    vpn,
                    page_count: self.table.len(),
                });
            }
        };

        let source = if loaded {
            let Some(slot) = self.swap.slot(vpn) else {
                log::error!("vmm: page {} of pid {} has no swap slot", vpn, self.pid);
                return Err(VmError::NoSwapSlot { pid: self.pid, vpn });
            };
            machine.write_physical(frame * page_size, slot);
            PageSource::Swap
        } else {
            self.read_from_image(vpn, frame, machine, images)?;
            PageSource::Image
        };

        if let Some(entry) = self.table.get_mut(vpn) {
            entry.map(frame);
            if source == PageSource::Image {
                entry.flags.insert(PteFlags::DIRTY);
            }
        }
        Ok(source)
    }

    fn read_from_image<M: Machine + ?Sized>(
        &self,
        vpn: Vpn,
        frame: FrameId,
        machine: &mut M,
        images: &dyn ImageStore,
    ) -> VmResult<()> {
        let page_start = vpn * self.page_size;
        let page_end = page_start + self.page_size;
        let segments = [self.header.code, self.header.init_data];
        if !segments.iter().any(|s| s.overlap(page_start, page_end).is_some()) {
            return Ok(());
        }

        // 句柄在函数返回时关闭
        let image = images.open(&self.image_name).ok_or(VmError::ImageNotFound)?;
        for segment in segments {
            let Some((vaddr, file_offset, len)) = segment.overlap(page_start, page_end) else {
                continue;
            };
            let mut buf = vec![0u8; len];
            let read = image
                .read_at(file_offset, &mut buf)
                .map_err(|_| VmError::ImageReadFailed)?;
            if read < len {
                log::warn!(
                    "vmm: short read of {} at {:#x}: {} of {} bytes",
                    self.image_name,
                    file_offset,
                    read,
                    len
                );
            }
            machine.write_physical(frame * self.page_size + (vaddr - page_start), &buf);
        }
        Ok(())
    }
}
