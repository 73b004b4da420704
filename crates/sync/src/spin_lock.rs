//! 自旋锁封装
//!
//! 把 [`RawSpinLock`] 与受保护的数据绑定在一起。

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use crate::raw_spin_lock::{RawSpinLock, RawSpinLockGuard};

/// 提供对数据互斥访问的自旋锁。
///
/// 持锁期间本地中断被关闭，因此临界区应尽量短，且不能在持锁时睡眠。
/// 不可重入。
#[derive(Debug)]
pub struct SpinLock<T> {
    raw_lock: RawSpinLock,
    data: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    /// 创建一个新的 SpinLock
    pub const fn new(data: T) -> Self {
        SpinLock {
            raw_lock: RawSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// 获取锁
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let _raw_guard = self.raw_lock.lock();
        SpinLockGuard {
            _raw_guard,
            // SAFETY: 持有 raw_lock，独占访问 data
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 尝试获取锁
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.raw_lock.try_lock().map(|_raw_guard| SpinLockGuard {
            _raw_guard,
            // SAFETY: 同上
            data: unsafe { &mut *self.data.get() },
        })
    }

    /// 锁当前是否被占用
    pub fn is_locked(&self) -> bool {
        self.raw_lock.is_locked()
    }

    /// 通过独占引用直接访问数据，无需上锁
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// 消耗锁并取出数据
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// SpinLock 的 RAII 保护器，离开作用域时释放锁
pub struct SpinLockGuard<'a, T> {
    _raw_guard: RawSpinLockGuard<'a>,
    data: &'a mut T,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data
    }
}

// SAFETY: 对 data 的访问都经过 raw_lock 串行化
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_gives_exclusive_access() {
        let lock = SpinLock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(lock.is_locked());
            assert!(lock.try_lock().is_none());
        }
        assert_eq!(*lock.lock(), 1);
        assert_eq!(lock.into_inner(), 1);
    }
}
