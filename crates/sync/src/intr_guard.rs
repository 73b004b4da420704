//! 中断保护器
//!
//! 禁用中断只能阻止本地 CPU 上“任务 vs 中断”的并发，多核共享数据仍需要自旋锁。

use crate::arch_ops;

/// RAII 中断保护器：创建时关中断并保存原状态，销毁时恢复。
///
/// ```ignore
/// {
///     let _guard = IntrGuard::new();
///     // 临界区
/// }
/// ```
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 关闭本地中断，返回保护器
    pub fn new() -> Self {
        // SAFETY: flags 只会在 drop 时原样交还给 restore_interrupts
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        IntrGuard { flags }
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 来自 new() 中保存的中断状态
        unsafe { arch_ops().restore_interrupts(self.flags) };
    }
}
