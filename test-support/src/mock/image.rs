//! 可执行文件仓库的 Mock 实现
//!
//! 文件内容保存在内存中；每次打开返回一个共享内容的句柄，
//! 通过引用计数可以检查是否有句柄被长期持有。

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use sync::SpinLock;

/// 已打开的 Mock 可执行文件
pub struct MockImage {
    data: Arc<[u8]>,
}

impl MockImage {
    /// 从 `offset` 处读取，返回实际读取的字节数（越界部分不读）
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        if offset >= self.data.len() {
            return 0;
        }
        let len = buf.len().min(self.data.len() - offset);
        buf[..len].copy_from_slice(&self.data[offset..offset + len]);
        len
    }
}

/// Mock 的可执行文件仓库
pub struct MockImageStore {
    files: SpinLock<BTreeMap<String, Arc<[u8]>>>,
    opens: AtomicUsize,
}

impl MockImageStore {
    pub const fn new() -> Self {
        Self {
            files: SpinLock::new(BTreeMap::new()),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.files.lock().insert(name.to_string(), Arc::from(bytes));
    }

    pub fn open(&self, name: &str) -> Option<MockImage> {
        let data = self.files.lock().get(name).cloned()?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Some(MockImage { data })
    }

    /// 累计成功打开的次数
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// 当前仍未关闭的句柄数量
    pub fn live_handles(&self, name: &str) -> usize {
        self.files
            .lock()
            .get(name)
            .map(|data| Arc::strong_count(data) - 1)
            .unwrap_or(0)
    }
}

impl Default for MockImageStore {
    fn default() -> Self {
        Self::new()
    }
}
