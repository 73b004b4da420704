//! 网络相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `net` crate（避免循环依赖）。
//! `net` crate 在 `cfg(test)` 下为这些类型实现其 trait（例如 `NetOps`）。

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Mock 的网络运行时操作
///
/// - 时钟每被读取一次前进 `TICK_MS` 毫秒，保证协议栈定时器能够推进
/// - 记录唤醒次数，便于断言“事件到达后唤醒了等待者”
/// - 阻塞等待默认立即以“被信号打断”返回，避免测试挂死
pub struct MockNetOps {
    clock_ms: AtomicU64,
    wakeups: AtomicUsize,
}

impl MockNetOps {
    /// 每次读取时钟前进的毫秒数
    pub const TICK_MS: u64 = 10;

    pub const fn new() -> Self {
        Self {
            clock_ms: AtomicU64::new(0),
            wakeups: AtomicUsize::new(0),
        }
    }

    /// 读取并推进时钟
    pub fn tick(&self) -> u64 {
        self.clock_ms.fetch_add(Self::TICK_MS, Ordering::Relaxed)
    }

    /// 记录一次唤醒
    pub fn record_wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    /// 迄今为止的唤醒次数
    pub fn wakeups(&self) -> usize {
        self.wakeups.load(Ordering::Relaxed)
    }
}

/// 全局 Mock 实例
pub static MOCK_NET_OPS: MockNetOps = MockNetOps::new();
