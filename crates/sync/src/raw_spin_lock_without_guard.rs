//! 不触碰中断状态的自旋互斥锁
//!
//! 通过实现 `lock_api::RawMutex` 获得完整的 `Mutex`/`MutexGuard` 能力，
//! 其中 `MutexGuard::unlocked` 允许持锁者在阻塞等待期间临时释放锁，
//! 等待结束后自动重新获取。

use core::hint;
use core::sync::atomic::{AtomicBool, Ordering};

/// 原始自旋锁（无中断保护）
#[derive(Debug)]
pub struct RawSpinLockWithoutGuard {
    locked: AtomicBool,
}

unsafe impl lock_api::RawMutex for RawSpinLockWithoutGuard {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLockWithoutGuard {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// 基于 [`RawSpinLockWithoutGuard`] 的互斥锁
pub type SpinMutex<T> = lock_api::Mutex<RawSpinLockWithoutGuard, T>;

/// [`SpinMutex`] 的 RAII 保护器
pub type SpinMutexGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLockWithoutGuard, T>;
