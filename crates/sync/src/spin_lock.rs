//! 自旋锁封装
//!
//! 提供对数据的互斥访问的自旋锁结构体，持锁期间关闭中断。

use crate::intr_guard::IntrGuard;
use crate::raw_spin_lock::RawSpinLock;

/// 提供对数据的互斥访问的自旋锁结构体。
///
/// 内部是 `lock_api::Mutex<RawSpinLock, T>`，守卫额外持有一个 [`IntrGuard`]。
///
/// # 示例
/// ```ignore
/// let lock = SpinLock::new(0);
/// {
///     let mut guard = lock.lock(); // 获取锁，禁用中断
///     *guard += 1;
/// } // 离开作用域，先释放锁再恢复中断
/// ```
///
/// # 注意
/// SpinLock 不是可重入的。当持有锁时，尝试再次获取锁将导致死锁。
#[derive(Debug)]
pub struct SpinLock<T> {
    inner: lock_api::Mutex<RawSpinLock, T>,
}

impl<T> SpinLock<T> {
    /// 创建一个新的 SpinLock 实例，初始化内部数据。
    pub const fn new(data: T) -> Self {
        SpinLock {
            inner: lock_api::Mutex::const_new(RawSpinLock::new(), data),
        }
    }

    /// 获取自旋锁，并返回一个 RAII 保护器，用于访问和修改内部数据。
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let intr_guard = IntrGuard::new();
        SpinLockGuard {
            inner: self.inner.lock(),
            _intr_guard: intr_guard,
        }
    }

    /// 尝试获取自旋锁，如果成功则返回 RAII 保护器，否则返回 None。
    ///
    /// 获取失败时 IntrGuard 随之 drop，中断状态立即恢复。
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let intr_guard = IntrGuard::new();
        self.inner.try_lock().map(|inner| SpinLockGuard {
            inner,
            _intr_guard: intr_guard,
        })
    }

    /// 检查锁是否被占用 (仅用于调试/测试)
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// 取出内部数据
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// SpinLock 的 RAII 保护器，提供对锁定数据的访问。
///
/// 字段按声明顺序 drop：先释放锁标志，再恢复中断状态。
pub struct SpinLockGuard<'a, T> {
    inner: lock_api::MutexGuard<'a, RawSpinLock, T>,
    _intr_guard: IntrGuard,
}

impl<T> core::ops::Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> core::ops::DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
