//! 可执行文件接口
//!
//! 地址空间只保存可执行文件的名字，需要读取代码段或数据段时重新打开，
//! 读完即关闭（丢弃句柄），不会在挂起点之间持有文件句柄。

mod noff;

pub use noff::{NOFF_HEADER_SIZE, NOFF_MAGIC, NoffHeader, Segment};

use alloc::sync::Arc;

/// 已打开的可执行文件
///
/// 此 trait 抽象了装载程序所需的最小接口，关闭即 drop。
pub trait ProgramImage: Send + Sync {
    /// 从指定偏移读取数据到缓冲区，返回实际读取的字节数
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;
}

/// 按名字打开可执行文件的仓库
pub trait ImageStore: Send + Sync {
    /// 打开名为 `name` 的可执行文件，不存在时返回 `None`
    fn open(&self, name: &str) -> Option<Arc<dyn ProgramImage>>;
}
