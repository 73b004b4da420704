//! 连接对象
//!
//! 每个后端有自己形态的连接状态（TCP、UDP、本地、usrsock），统一由 [`ConnRef`] 持有：
//!
//! - 分配时引用计数恰为 1，调用者独占，其他 socket 看不到它
//! - 只有显式的 [`ConnRef::share`] 才会增加引用计数（对应文件描述符复制）
//! - 最后一个引用被丢弃时，后端状态的 `Drop` 运行且只运行一次，随后连接池槽位归还

use alloc::sync::{Arc, Weak};
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, warn};
use sync::{SpinLock, SpinLockGuard};

use crate::error::NetError;
#[cfg(feature = "tcp")]
use crate::inet::tcp::TcpConn;
#[cfg(feature = "udp")]
use crate::inet::udp::UdpConn;
#[cfg(feature = "local")]
use crate::local::LocalConn;
#[cfg(feature = "usrsock")]
use crate::usrsock::UsrsockConn;

static NEXT_CONN_ID: AtomicUsize = AtomicUsize::new(1);

/// 固定容量的连接对象池
#[derive(Debug)]
pub struct ConnPool {
    name: &'static str,
    capacity: usize,
    in_use: AtomicUsize,
}

impl ConnPool {
    /// 创建连接池
    pub fn new(name: &'static str, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            capacity,
            in_use: AtomicUsize::new(0),
        })
    }

    /// 池容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 正在使用的槽位数
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// 预留一个槽位；池满时返回 [`NetError::ResourceExhausted`]
    pub(crate) fn reserve(self: &Arc<Self>) -> Result<PoolSlot, NetError> {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map_err(|_| {
                warn!("net: {} connection pool exhausted ({})", self.name, self.capacity);
                NetError::ResourceExhausted
            })?;
        Ok(PoolSlot { pool: self.clone() })
    }
}

/// 连接池中的一个槽位，drop 时归还
#[derive(Debug)]
pub(crate) struct PoolSlot {
    pool: Arc<ConnPool>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

// 字段按声明顺序 drop：先释放后端状态，再归还槽位
struct ConnInner<T> {
    id: usize,
    state: SpinLock<T>,
    _slot: PoolSlot,
}

impl<T> Drop for ConnInner<T> {
    fn drop(&mut self) {
        debug!("net: conn {} destroyed", self.id);
    }
}

/// 连接对象的共享所有权句柄
///
/// 不实现 `Clone`：复制必须通过 [`ConnRef::share`] 显式进行。
pub struct ConnRef<T> {
    inner: Arc<ConnInner<T>>,
}

impl<T> ConnRef<T> {
    /// 用已预留的槽位创建连接对象，引用计数为 1
    pub(crate) fn new(slot: PoolSlot, state: T) -> Self {
        Self::build(slot, |_| state)
    }

    /// 同 [`ConnRef::new`]，后端状态需要知道自己的连接标识时使用
    pub(crate) fn build(slot: PoolSlot, state: impl FnOnce(usize) -> T) -> Self {
        let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        debug!("net: conn {} allocated from {} pool", id, slot.pool.name);
        Self {
            inner: Arc::new(ConnInner {
                id,
                state: SpinLock::new(state(id)),
                _slot: slot,
            }),
        }
    }

    /// 从连接池分配
    pub fn alloc(pool: &Arc<ConnPool>, state: T) -> Result<Self, NetError> {
        Ok(Self::new(pool.reserve()?, state))
    }

    /// 增加一个引用
    pub fn share(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }

    /// 当前引用计数
    pub fn crefs(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// 连接对象的唯一标识
    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// 锁住后端状态
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.inner.state.lock()
    }

    /// 两个句柄是否指向同一个连接对象
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// 不持有所有权的弱引用
    pub fn downgrade(&self) -> WeakConn<T> {
        WeakConn {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ConnRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnRef")
            .field("id", &self.id())
            .field("crefs", &self.crefs())
            .finish()
    }
}

/// 连接对象的弱引用，不影响引用计数
pub struct WeakConn<T> {
    inner: Weak<ConnInner<T>>,
}

impl<T> WeakConn<T> {
    /// 连接对象仍然存在时取得一个强引用
    pub fn upgrade(&self) -> Option<ConnRef<T>> {
        self.inner.upgrade().map(|inner| ConnRef { inner })
    }

    /// 连接对象是否仍然存在
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<T> Clone for WeakConn<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// socket 上挂接的连接对象，按后端区分
#[derive(Debug)]
pub enum Connection {
    /// 流式（TCP）
    #[cfg(feature = "tcp")]
    Tcp(ConnRef<TcpConn>),
    /// 数据报（UDP）
    #[cfg(feature = "udp")]
    Udp(ConnRef<UdpConn>),
    /// 本地（Unix 域）
    #[cfg(feature = "local")]
    Local(ConnRef<LocalConn>),
    /// 由外部提供者接管
    #[cfg(feature = "usrsock")]
    Usrsock(ConnRef<UsrsockConn>),
}

macro_rules! with_conn {
    ($conn:expr, $c:ident => $body:expr) => {
        match $conn {
            #[cfg(feature = "tcp")]
            Connection::Tcp($c) => $body,
            #[cfg(feature = "udp")]
            Connection::Udp($c) => $body,
            #[cfg(feature = "local")]
            Connection::Local($c) => $body,
            #[cfg(feature = "usrsock")]
            Connection::Usrsock($c) => $body,
        }
    };
}

impl Connection {
    /// 增加一个引用
    pub fn share(&self) -> Self {
        match self {
            #[cfg(feature = "tcp")]
            Connection::Tcp(c) => Connection::Tcp(c.share()),
            #[cfg(feature = "udp")]
            Connection::Udp(c) => Connection::Udp(c.share()),
            #[cfg(feature = "local")]
            Connection::Local(c) => Connection::Local(c.share()),
            #[cfg(feature = "usrsock")]
            Connection::Usrsock(c) => Connection::Usrsock(c.share()),
        }
    }

    /// 当前引用计数
    pub fn crefs(&self) -> usize {
        with_conn!(self, c => c.crefs())
    }

    /// 连接对象的唯一标识
    pub fn id(&self) -> usize {
        with_conn!(self, c => c.id())
    }

    /// 是否与另一个连接指向同一个对象
    pub fn same_as(&self, other: &Connection) -> bool {
        self.id() == other.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::sync::atomic::AtomicUsize;

    struct Counted<'a>(&'a AtomicUsize);

    impl Drop for Counted<'_> {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_alloc_starts_unique() {
        crate::testing::init();
        let pool = ConnPool::new("test", 4);
        let conn = ConnRef::alloc(&pool, 7u32).unwrap();
        assert_eq!(conn.crefs(), 1);
        assert_eq!(pool.in_use(), 1);
        assert_eq!(*conn.lock(), 7);
    }

    #[test]
    fn test_destroyed_exactly_once_on_last_drop() {
        crate::testing::init();
        let drops = AtomicUsize::new(0);
        let pool = ConnPool::new("test", 4);
        let first = ConnRef::alloc(&pool, Counted(&drops)).unwrap();

        let mut shares: Vec<_> = (0..3).map(|_| first.share()).collect();
        assert_eq!(first.crefs(), 4);
        assert!(ConnRef::ptr_eq(&first, &shares[0]));

        drop(first);
        shares.pop();
        shares.pop();
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(shares[0].crefs(), 1);
        assert_eq!(pool.in_use(), 1);

        shares.clear();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_pool_exhaustion_is_reported() {
        crate::testing::init();
        let pool = ConnPool::new("test", 1);
        let held = ConnRef::alloc(&pool, ()).unwrap();
        assert_eq!(ConnRef::alloc(&pool, ()).err(), Some(NetError::ResourceExhausted));
        drop(held);
        assert!(ConnRef::alloc(&pool, ()).is_ok());
    }

    #[test]
    fn test_weak_does_not_count() {
        crate::testing::init();
        let pool = ConnPool::new("test", 1);
        let conn = ConnRef::alloc(&pool, ()).unwrap();
        let weak = conn.downgrade();
        assert_eq!(conn.crefs(), 1);
        assert!(weak.is_alive());
        let id = conn.id();
        drop(conn);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
        assert!(id > 0);
    }
}
