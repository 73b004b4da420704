//! 架构相关操作的 Mock 实现
//!
//! 只模拟一个 CPU 的中断使能位，并统计关中断次数，便于断言锁确实进入了临界区。

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Mock 架构操作
pub struct MockArchOps {
    enabled: AtomicBool,
    disables: AtomicUsize,
}

impl MockArchOps {
    /// 模拟的中断使能位
    pub const SIE: usize = 0x2;

    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            disables: AtomicUsize::new(0),
        }
    }

    pub unsafe fn read_and_disable_interrupts(&self) -> usize {
        self.disables.fetch_add(1, Ordering::Relaxed);
        if self.enabled.swap(false, Ordering::SeqCst) {
            Self::SIE
        } else {
            0
        }
    }

    pub unsafe fn restore_interrupts(&self, flags: usize) {
        self.enabled.store(flags & Self::SIE != 0, Ordering::SeqCst);
    }

    /// 迄今为止关中断的次数
    pub fn disables(&self) -> usize {
        self.disables.load(Ordering::Relaxed)
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();
