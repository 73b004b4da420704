//! TCP/UDP 端口表
//!
//! 绑定某个端口的 socket 会在对应表中留下记录，用于检测端口冲突。
//! 端口 0 表示由协议栈在临时端口范围内分配。

use alloc::collections::BTreeSet;

use log::warn;
use uapi::errno;

use crate::error::NetError;

#[derive(Debug)]
pub(crate) struct PortTable {
    proto: &'static str,
    bound: BTreeSet<u16>,
    first: u16,
    last: u16,
    next: u16,
}

impl PortTable {
    pub(crate) fn new(proto: &'static str, range: (u16, u16)) -> Self {
        let (first, last) = ephemeral_range(range);
        Self {
            proto,
            bound: BTreeSet::new(),
            first,
            last,
            next: first,
        }
    }

    /// 记录端口；0 时分配一个临时端口。冲突返回 `EADDRINUSE`
    pub(crate) fn bind(&mut self, port: u16) -> Result<u16, NetError> {
        if port == 0 {
            return self.bind_ephemeral();
        }
        if !self.bound.insert(port) {
            warn!("net: {} port {} already in use", self.proto, port);
            return Err(NetError::Backend(errno::EADDRINUSE));
        }
        Ok(port)
    }

    /// 在临时端口范围内轮转查找未被占用的端口
    pub(crate) fn bind_ephemeral(&mut self) -> Result<u16, NetError> {
        let span = usize::from(self.last - self.first) + 1;
        for _ in 0..span {
            let port = self.next;
            self.next = match self.next.checked_add(1) {
                Some(next) if port != self.last => next,
                _ => self.first,
            };
            if self.bound.insert(port) {
                return Ok(port);
            }
        }
        warn!("net: {} ephemeral ports exhausted", self.proto);
        Err(NetError::Backend(errno::EADDRINUSE))
    }

    /// 解除端口记录（socket 释放时调用）
    pub(crate) fn unbind(&mut self, port: u16) {
        self.bound.remove(&port);
    }

    #[cfg(test)]
    pub(crate) fn is_bound(&self, port: u16) -> bool {
        self.bound.contains(&port)
    }
}

/// 规整临时端口范围：首尾颠倒时交换，端口 0 不参与分配
fn ephemeral_range((first, last): (u16, u16)) -> (u16, u16) {
    let (first, last) = if first <= last { (first, last) } else { (last, first) };
    let first = first.max(1);
    (first, last.max(first))
}
