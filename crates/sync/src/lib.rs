//! 同步原语
//!
//! 网络协议栈使用两类锁：
//!
//! - [`SpinLock`]：关中断 + 自旋，保护连接对象、端口表等短临界区
//! - [`SpinMutex`]：基于 `lock_api` 的自旋互斥锁，不触碰中断状态，
//!   支持在持锁期间通过 `MutexGuard::unlocked` 临时释放（协议栈全局锁依赖这一点）
//!
//! # 架构依赖
//!
//! 关中断由 `ArchOps` trait 抽象，使用 [`SpinLock`] 之前必须调用
//! [`register_arch_ops`] 注册实现。[`SpinMutex`] 没有架构依赖。

#![no_std]

mod intr_guard;
mod raw_spin_lock;
mod raw_spin_lock_without_guard;
mod spin_lock;

pub use intr_guard::*;
pub use raw_spin_lock::*;
pub use raw_spin_lock_without_guard::*;
pub use spin_lock::*;

use core::sync::atomic::{AtomicUsize, Ordering};

/// 架构相关操作的 trait
///
/// 由内核实现并注册，提供中断控制
pub trait ArchOps: Send + Sync {
    /// 读取并禁用中断，返回之前的状态
    ///
    /// # Safety
    /// 调用者必须确保在适当的上下文中调用
    unsafe fn read_and_disable_interrupts(&self) -> usize;

    /// 恢复中断状态
    ///
    /// # Safety
    /// flags 必须是之前 read_and_disable_interrupts 返回的值
    unsafe fn restore_interrupts(&self, flags: usize);
}

// fat pointer 的 data / vtable 两部分
static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_arch_ops(ops: &'static dyn ArchOps) {
    let ptr = ops as *const dyn ArchOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) = unsafe { core::mem::transmute::<*const dyn ArchOps, (usize, usize)>(ptr) };
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
    ARCH_OPS_DATA.store(data, Ordering::Release);
}

/// 获取架构操作实例
#[inline]
pub(crate) fn arch_ops() -> &'static dyn ArchOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        #[cfg(test)]
        {
            extern crate test_support;
            return &test_support::mock::arch::MOCK_ARCH_OPS;
        }
        #[cfg(not(test))]
        panic!("sync: ArchOps not registered, call register_arch_ops first");
    }
    // SAFETY: data 和 vtable 是通过 register_arch_ops 设置的有效指针
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchOps>((data, vtable)) }
}
