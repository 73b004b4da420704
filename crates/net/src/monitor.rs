//! 连接事件监视
//!
//! 已连接的流式 socket（accept 得到的或 connect 完成的）登记到监视表，
//! 对端断开时协议栈调用 [`MonitorTable::signal`]，把对应 socket 标记为连接丢失。
//!
//! 每个登记项有一个 `1..=i16::MAX` 内的键，循环分配并跳过仍在使用的键；
//! 同一连接上的多个登记项按登记顺序处理。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
#[cfg(feature = "tcp")]
use smoltcp::iface::SocketHandle;
use sync::SpinLock;
use uapi::errno;

use crate::error::NetError;
use crate::socket::Socket;
use crate::stack::StackCore;

/// 监视对象，决定协议栈如何判断连接是否仍然存在
#[derive(Debug, Clone, Copy)]
pub(crate) enum MonitorTarget {
    #[cfg(feature = "tcp")]
    Tcp(SocketHandle),
    #[cfg(feature = "local")]
    Local,
}

struct MonitorEntry {
    key: i16,
    conn_id: usize,
    target: MonitorTarget,
    lost: Arc<AtomicBool>,
}

struct MonitorInner {
    entries: Vec<MonitorEntry>,
    last_key: i16,
}

/// 监视表
pub struct MonitorTable {
    inner: SpinLock<MonitorInner>,
}

impl MonitorTable {
    /// 创建空表
    pub fn new() -> Self {
        Self {
            inner: SpinLock::new(MonitorInner {
                entries: Vec::new(),
                last_key: 0,
            }),
        }
    }

    /// 登记一个连接，返回登记键
    pub(crate) fn setup(
        &self,
        conn_id: usize,
        target: MonitorTarget,
        lost: Arc<AtomicBool>,
    ) -> Result<i16, NetError> {
        let mut inner = self.inner.lock();
        if inner.entries.len() >= i16::MAX as usize {
            warn!("net: monitor table full");
            return Err(NetError::ResourceExhausted);
        }

        let key = loop {
            inner.last_key = if inner.last_key == i16::MAX {
                1
            } else {
                inner.last_key + 1
            };
            let candidate = inner.last_key;
            if !inner.entries.iter().any(|e| e.key == candidate) {
                break candidate;
            }
        };

        inner.entries.push(MonitorEntry {
            key,
            conn_id,
            target,
            lost,
        });
        debug!("net: monitor {} registered for conn {}", key, conn_id);
        Ok(key)
    }

    /// 注销登记项
    pub fn teardown(&self, key: i16) -> Result<(), NetError> {
        let mut inner = self.inner.lock();
        let pos = inner
            .entries
            .iter()
            .position(|e| e.key == key)
            .ok_or(NetError::Backend(errno::ENOENT))?;
        inner.entries.remove(pos);
        Ok(())
    }

    /// 通知连接丢失：触发并移除该连接的全部登记项，返回触发的个数
    pub fn signal(&self, conn_id: usize) -> usize {
        let mut inner = self.inner.lock();
        let mut fired = 0;
        inner.entries.retain(|e| {
            if e.conn_id != conn_id {
                return true;
            }
            e.lost.store(true, Ordering::Release);
            fired += 1;
            false
        });
        if fired > 0 {
            debug!("net: conn {} lost, {} monitor(s) fired", conn_id, fired);
        }
        fired
    }

    /// 移除该连接的全部登记项，不触发
    pub(crate) fn purge(&self, conn_id: usize) {
        self.inner.lock().entries.retain(|e| e.conn_id != conn_id);
    }

    /// 登记项个数
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// 表是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有 TCP 登记项 (连接标识, smoltcp 句柄)
    #[cfg(feature = "tcp")]
    pub(crate) fn tcp_targets(&self) -> Vec<(usize, SocketHandle)> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter_map(|e| match e.target {
                MonitorTarget::Tcp(handle) => Some((e.conn_id, handle)),
                #[allow(unreachable_patterns)]
                _ => None,
            })
            .collect()
    }
}

impl Default for MonitorTable {
    fn default() -> Self {
        Self::new()
    }
}

/// socket 持有的登记信息
#[derive(Debug)]
pub(crate) struct SocketMonitor {
    pub(crate) key: i16,
    pub(crate) lost: Arc<AtomicBool>,
}

/// 开始监视 socket 上的连接
///
/// 调用者持有网络锁。对端已经断开时返回 [`NetError::NotConnected`]，
/// 不产生登记项。数据报与 usrsock 连接不需要监视，直接成功。
pub(crate) fn start_monitor(core: &StackCore, psock: &mut Socket) -> Result<(), NetError> {
    let Some(conn) = psock.conn.as_ref() else {
        return Err(NetError::NotConnected);
    };
    let conn_id = conn.id();

    let (alive, target) = match conn {
        #[cfg(feature = "tcp")]
        crate::conn::Connection::Tcp(tcp) => {
            let handle = tcp.lock().handle();
            (core.inet.tcp_is_active(handle), MonitorTarget::Tcp(handle))
        }
        #[cfg(feature = "local")]
        crate::conn::Connection::Local(local) => (local.lock().peer_alive(), MonitorTarget::Local),
        #[allow(unreachable_patterns)]
        _ => return Ok(()),
    };

    if !alive {
        warn!("net: conn {} torn down before monitor setup", conn_id);
        return Err(NetError::NotConnected);
    }

    stop_monitor(psock);
    let lost = Arc::new(AtomicBool::new(false));
    let key = psock.stack.monitors().setup(conn_id, target, lost.clone())?;
    psock.monitor = Some(SocketMonitor { key, lost });
    Ok(())
}

/// 停止监视；socket 没有登记时什么也不做
pub(crate) fn stop_monitor(psock: &mut Socket) {
    if let Some(monitor) = psock.monitor.take() {
        // 连接丢失时登记项已经被 signal 移除
        let _ = psock.stack.monitors().teardown(monitor.key);
    }
}

#[cfg(all(test, feature = "local"))]
mod tests {
    use super::*;

    const TARGET: MonitorTarget = MonitorTarget::Local;

    fn flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_keys_are_unique_and_positive() {
        crate::testing::init();
        let table = MonitorTable::new();
        let a = table.setup(1, TARGET, flag()).unwrap();
        let b = table.setup(2, TARGET, flag()).unwrap();
        assert!(a > 0 && b > 0);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_key_wraps_and_skips_used() {
        crate::testing::init();
        let table = MonitorTable::new();
        let first = table.setup(1, TARGET, flag()).unwrap();
        assert_eq!(first, 1);
        table.inner.lock().last_key = i16::MAX - 1;
        assert_eq!(table.setup(2, TARGET, flag()).unwrap(), i16::MAX);
        // 1 仍在使用，回绕后跳到 2
        assert_eq!(table.setup(3, TARGET, flag()).unwrap(), 2);
    }

    #[test]
    fn test_teardown_unknown_key() {
        crate::testing::init();
        let table = MonitorTable::new();
        assert_eq!(table.teardown(5), Err(NetError::Backend(errno::ENOENT)));
        let key = table.setup(1, TARGET, flag()).unwrap();
        assert_eq!(table.teardown(key), Ok(()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_signal_fires_once() {
        crate::testing::init();
        let table = MonitorTable::new();
        let lost = flag();
        let other = flag();
        table.setup(7, TARGET, lost.clone()).unwrap();
        table.setup(8, TARGET, other.clone()).unwrap();

        assert_eq!(table.signal(7), 1);
        assert!(lost.load(Ordering::Acquire));
        assert!(!other.load(Ordering::Acquire));
        assert_eq!(table.signal(7), 0);
        assert_eq!(table.len(), 1);

        table.purge(8);
        assert!(table.is_empty());
        assert!(!other.load(Ordering::Acquire));
    }
}
