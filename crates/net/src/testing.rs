//! 测试辅助：注册 ArchOps、构造独立的协议栈

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use sync::ArchOps;

use crate::config::NetConfig;
use crate::stack::NetStack;

struct DummyArchOps;

impl ArchOps for DummyArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        0
    }

    unsafe fn restore_interrupts(&self, _flags: usize) {}
}

static DUMMY_ARCH_OPS: DummyArchOps = DummyArchOps;
// 0 = uninit, 1 = initializing, 2 = ready
static SYNC_INIT: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn init() {
    match SYNC_INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            // Safety: tests use a single global dummy ArchOps.
            unsafe { sync::register_arch_ops(&DUMMY_ARCH_OPS) };
            SYNC_INIT.store(2, Ordering::Release);
        }
        Err(_) => {
            while SYNC_INIT.load(Ordering::Acquire) != 2 {
                core::hint::spin_loop();
            }
        }
    }
}

/// 使用默认配置的协议栈
pub(crate) fn stack() -> Arc<NetStack> {
    stack_with(NetConfig::default())
}

pub(crate) fn stack_with(config: NetConfig) -> Arc<NetStack> {
    init();
    NetStack::new(config)
}
