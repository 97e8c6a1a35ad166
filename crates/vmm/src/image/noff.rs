//! NOFF 可执行文件头
//!
//! 文件头固定 40 字节，位于文件开头：魔数，然后依次是代码段、已初始化数据段、
//! 未初始化数据段，每段为 `{virtual_addr, in_file_addr, size}` 三个 32 位字。
//! 磁盘上是小端序；若魔数不匹配但字节反转后匹配，则整个文件头逐字反转。

use crate::error::{VmError, VmResult};

/// NOFF 魔数
pub const NOFF_MAGIC: u32 = 0x00ba_dfad;

/// 文件头字节数
pub const NOFF_HEADER_SIZE: usize = 40;

/// 一个段的描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    /// 段在虚拟地址空间中的起始地址
    pub virtual_addr: u32,
    /// 段在文件中的偏移
    pub in_file_addr: u32,
    /// 段大小（字节）
    pub size: u32,
}

impl Segment {
    fn swap_bytes(self) -> Self {
        Self {
            virtual_addr: self.virtual_addr.swap_bytes(),
            in_file_addr: self.in_file_addr.swap_bytes(),
            size: self.size.swap_bytes(),
        }
    }

    /// 段与虚拟地址区间 `[start, end)` 的交集，返回 (虚拟地址, 文件偏移, 长度)
    pub fn overlap(&self, start: usize, end: usize) -> Option<(usize, usize, usize)> {
        let seg_start = self.virtual_addr as usize;
        let seg_end = seg_start + self.size as usize;
        let lo = start.max(seg_start);
        let hi = end.min(seg_end);
        if lo >= hi {
            return None;
        }
        Some((lo, self.in_file_addr as usize + (lo - seg_start), hi - lo))
    }
}

/// 可执行文件头
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoffHeader {
    /// 魔数
    pub magic: u32,
    /// 代码段
    pub code: Segment,
    /// 已初始化数据段
    pub init_data: Segment,
    /// 未初始化数据段
    pub uninit_data: Segment,
}

impl NoffHeader {
    /// 解析文件头，必要时反转字节序
    pub fn parse(bytes: &[u8]) -> VmResult<Self> {
        let bytes: &[u8; NOFF_HEADER_SIZE] = bytes
            .get(..NOFF_HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(VmError::BadExecutableFormat)?;
        let word = |i: usize| {
            u32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        let segment = |i: usize| Segment {
            virtual_addr: word(i),
            in_file_addr: word(i + 1),
            size: word(i + 2),
        };
        let header = Self {
            magic: word(0),
            code: segment(1),
            init_data: segment(4),
            uninit_data: segment(7),
        };
        if header.magic == NOFF_MAGIC {
            Ok(header)
        } else if header.magic.swap_bytes() == NOFF_MAGIC {
            Ok(header.swap_bytes())
        } else {
            Err(VmError::BadExecutableFormat)
        }
    }

    /// 按磁盘格式（小端序）编码
    pub fn to_bytes(&self) -> [u8; NOFF_HEADER_SIZE] {
        let words = [
            self.magic,
            self.code.virtual_addr,
            self.code.in_file_addr,
            self.code.size,
            self.init_data.virtual_addr,
            self.init_data.in_file_addr,
            self.init_data.size,
            self.uninit_data.virtual_addr,
            self.uninit_data.in_file_addr,
            self.uninit_data.size,
        ];
        let mut out = [0u8; NOFF_HEADER_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// 代码、数据段加上用户栈共占多少页
    pub fn page_count(&self, user_stack_size: usize, page_size: usize) -> usize {
        let size = self.code.size as usize
            + self.init_data.size as usize
            + self.uninit_data.size as usize
            + user_stack_size;
        size.div_ceil(page_size)
    }

    fn swap_bytes(self) -> Self {
        Self {
            magic: self.magic.swap_bytes(),
            code: self.code.swap_bytes(),
            init_data: self.init_data.swap_bytes(),
            uninit_data: self.uninit_data.swap_bytes(),
        }
    }
}
