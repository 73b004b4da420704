//! 协议栈上下文与网络锁
//!
//! [`NetStack`] 持有网络锁，锁内是可变的协议栈核心 [`StackCore`]：
//! smoltcp 接口与 socket 集合、端口表、本地 socket 命名空间。
//! 连接对象池、延迟回收队列、监视表以及外部协作者（usrsock 提供者、6LoWPAN 发送器）
//! 在锁外，各自有自己的短临界区。
//!
//! # 锁顺序
//!
//! 网络锁 → 连接对象锁 → 延迟回收队列 / 监视表。
//! 持有网络锁的代码不得再调用会获取网络锁的分派操作。

use alloc::sync::Arc;
use core::ops::{Deref, DerefMut};

use lazy_static::lazy_static;
use log::trace;
use sync::{SpinLock, SpinMutex, SpinMutexGuard};

use crate::config::NetConfig;
use crate::conn::ConnPool;
#[cfg(any(feature = "tcp", feature = "udp"))]
use crate::inet::iface::{InetCore, ReleaseQueue};
#[cfg(feature = "local")]
use crate::local::LocalNamespace;
use crate::monitor::MonitorTable;
use crate::ops::net_ops;
#[cfg(feature = "sixlowpan")]
use crate::sixlowpan::LowpanSender;
#[cfg(feature = "usrsock")]
use crate::usrsock::UsrsockProvider;

/// 网络锁保护的协议栈核心
pub struct StackCore {
    #[cfg(any(feature = "tcp", feature = "udp"))]
    pub(crate) inet: InetCore,
    #[cfg(feature = "local")]
    pub(crate) local: LocalNamespace,
}

/// 各后端的连接对象池
#[derive(Debug)]
pub struct StackPools {
    /// TCP
    pub tcp: Arc<ConnPool>,
    /// UDP
    pub udp: Arc<ConnPool>,
    /// 本地 socket
    pub local: Arc<ConnPool>,
    /// usrsock 句柄
    pub usrsock: Arc<ConnPool>,
}

/// 协议栈上下文
pub struct NetStack {
    config: NetConfig,
    core: SpinMutex<StackCore>,
    pools: StackPools,
    monitors: Arc<MonitorTable>,
    #[cfg(any(feature = "tcp", feature = "udp"))]
    release: Arc<ReleaseQueue>,
    #[cfg(feature = "usrsock")]
    usrsock: SpinLock<Option<Arc<dyn UsrsockProvider>>>,
    #[cfg(feature = "sixlowpan")]
    lowpan: SpinLock<Option<Arc<dyn LowpanSender>>>,
}

lazy_static! {
    /// 全局默认协议栈
    pub static ref NET_STACK: Arc<NetStack> = NetStack::new(NetConfig::default());
}

impl NetStack {
    /// 按配置创建协议栈
    pub fn new(config: NetConfig) -> Arc<Self> {
        let core = StackCore {
            #[cfg(any(feature = "tcp", feature = "udp"))]
            inet: InetCore::new(&config),
            #[cfg(feature = "local")]
            local: LocalNamespace::new(),
        };
        let pools = StackPools {
            tcp: ConnPool::new("tcp", config.tcp_conns),
            udp: ConnPool::new("udp", config.udp_conns),
            local: ConnPool::new("local", config.local_conns),
            usrsock: ConnPool::new("usrsock", config.usrsock_conns),
        };
        Arc::new(Self {
            config,
            core: SpinMutex::new(core),
            pools,
            monitors: Arc::new(MonitorTable::new()),
            #[cfg(any(feature = "tcp", feature = "udp"))]
            release: Arc::new(ReleaseQueue::default()),
            #[cfg(feature = "usrsock")]
            usrsock: SpinLock::new(None),
            #[cfg(feature = "sixlowpan")]
            lowpan: SpinLock::new(None),
        })
    }

    /// 运行时配置
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// 获取网络锁
    ///
    /// 上锁后先回收析构期间排队的后端资源。
    pub fn lock(&self) -> NetLockGuard<'_> {
        let mut guard = NetLockGuard {
            stack: self,
            guard: self.core.lock(),
        };
        guard.reap();
        guard
    }

    /// 网络锁当前是否被持有
    pub fn is_locked(&self) -> bool {
        self.core.is_locked()
    }

    /// 入站处理：驱动接口，把已建立的入站连接放进 backlog，检测连接丢失，唤醒等待者
    pub fn poll(&self) {
        self.lock().poll();
    }

    /// 连接对象池
    pub fn pools(&self) -> &StackPools {
        &self.pools
    }

    /// 连接事件监视表
    pub fn monitors(&self) -> &Arc<MonitorTable> {
        &self.monitors
    }

    #[cfg(any(feature = "tcp", feature = "udp"))]
    pub(crate) fn release_queue(&self) -> Arc<ReleaseQueue> {
        self.release.clone()
    }

    /// 注册外部 socket 提供者
    #[cfg(feature = "usrsock")]
    pub fn register_usrsock(&self, provider: Arc<dyn UsrsockProvider>) {
        *self.usrsock.lock() = Some(provider);
    }

    /// 已注册的外部 socket 提供者
    #[cfg(feature = "usrsock")]
    pub fn usrsock(&self) -> Option<Arc<dyn UsrsockProvider>> {
        self.usrsock.lock().clone()
    }

    /// 注册 6LoWPAN 发送器
    #[cfg(feature = "sixlowpan")]
    pub fn register_lowpan(&self, sender: Arc<dyn LowpanSender>) {
        *self.lowpan.lock() = Some(sender);
    }

    /// 已注册的 6LoWPAN 发送器
    #[cfg(feature = "sixlowpan")]
    pub fn lowpan(&self) -> Option<Arc<dyn LowpanSender>> {
        self.lowpan.lock().clone()
    }
}

/// 网络锁的 RAII 保护器，离开作用域时释放锁
pub struct NetLockGuard<'a> {
    stack: &'a NetStack,
    guard: SpinMutexGuard<'a, StackCore>,
}

impl<'a> NetLockGuard<'a> {
    /// 所属协议栈
    pub fn stack(&self) -> &'a NetStack {
        self.stack
    }

    /// 临时释放网络锁执行 `f`（通常是阻塞等待），返回前重新上锁
    pub fn unlocked<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let result = SpinMutexGuard::unlocked(&mut self.guard, f);
        self.reap();
        result
    }

    /// 在已持有锁的情况下做一次入站处理
    pub fn poll(&mut self) {
        self.reap();
        #[cfg(any(feature = "tcp", feature = "udp"))]
        {
            let monitors = self.stack.monitors.clone();
            self.guard.inet.poll(&monitors);
        }
        net_ops().wake_poll_waiters();
    }

    fn reap(&mut self) {
        #[cfg(any(feature = "tcp", feature = "udp"))]
        {
            let items = self.stack.release.take();
            if items.is_empty() {
                return;
            }
            trace!("net: reaping {} released connection(s)", items.len());
            for item in items {
                self.guard.inet.release(item, &self.stack.monitors);
            }
        }
    }
}

impl Deref for NetLockGuard<'_> {
    type Target = StackCore;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for NetLockGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
