//! 面向调用者的 socket
//!
//! [`Socket`] 记录地址族、类型、协议、状态标志，挂接一个连接对象，
//! 并保存创建时选定的分派器。所有操作都经由该分派器转发。

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::Ordering;

use bitflags::bitflags;
use log::{debug, error};
use uapi::socket::{
    MsgFlags, SOCK_CLOEXEC, SOCK_DGRAM, SOCK_NONBLOCK, SOCK_RAW, SOCK_SEQPACKET, SOCK_STREAM,
    SOCK_USRSOCK_TYPE,
};

use crate::addr::{AddressFamily, SockAddr};
use crate::conn::{ConnRef, Connection};
use crate::error::NetError;
#[cfg(feature = "tcp")]
use crate::inet::tcp::TcpConn;
#[cfg(feature = "udp")]
use crate::inet::udp::UdpConn;
#[cfg(feature = "local")]
use crate::local::LocalConn;
use crate::monitor::{self, SocketMonitor};
use crate::sockif::{sockif_for, SockIf};
use crate::stack::{NetStack, StackCore};
#[cfg(feature = "usrsock")]
use crate::usrsock::UsrsockConn;

bitflags! {
    /// socket 状态标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SocketFlags: u8 {
        /// 已绑定本地地址
        const BOUND = 1 << 0;
        /// 已连接（数据报：已关联）
        const CONNECTED = 1 << 1;
        /// 正在监听
        const LISTENING = 1 << 2;
        /// 非阻塞
        const NONBLOCK = 1 << 3;
        /// exec 时关闭
        const CLOEXEC = 1 << 4;
    }
}

/// socket 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    /// 面向连接的字节流
    Stream,
    /// 数据报
    Dgram,
    /// 原始 socket
    Raw,
    /// 有序分组
    Seqpacket,
    /// 由外部提供者接管
    Usrsock,
}

impl SocketType {
    /// 从 `SOCK_*` 取值解析，调用前应去掉创建标志
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            SOCK_STREAM => Some(SocketType::Stream),
            SOCK_DGRAM => Some(SocketType::Dgram),
            SOCK_RAW => Some(SocketType::Raw),
            SOCK_SEQPACKET => Some(SocketType::Seqpacket),
            SOCK_USRSOCK_TYPE => Some(SocketType::Usrsock),
            _ => None,
        }
    }

    /// 对应的 `SOCK_*` 取值
    pub fn as_raw(&self) -> i32 {
        match self {
            SocketType::Stream => SOCK_STREAM,
            SocketType::Dgram => SOCK_DGRAM,
            SocketType::Raw => SOCK_RAW,
            SocketType::Seqpacket => SOCK_SEQPACKET,
            SocketType::Usrsock => SOCK_USRSOCK_TYPE,
        }
    }
}

/// socket
pub struct Socket {
    pub(crate) domain: AddressFamily,
    pub(crate) ty: SocketType,
    pub(crate) protocol: i32,
    pub(crate) flags: SocketFlags,
    pub(crate) conn: Option<Connection>,
    pub(crate) sockif: &'static dyn SockIf,
    pub(crate) stack: Arc<NetStack>,
    pub(crate) monitor: Option<SocketMonitor>,
}

impl Socket {
    /// 创建 socket
    ///
    /// `ty` 可以带 `SOCK_NONBLOCK` / `SOCK_CLOEXEC`。成功后 socket 恰好挂接一个
    /// 引用计数为 1 的连接对象。
    pub fn new(stack: &Arc<NetStack>, domain: i32, ty: i32, protocol: i32) -> Result<Self, NetError> {
        let family = AddressFamily::from_raw(domain).ok_or_else(|| {
            error!("net: unsupported address family {}", domain);
            NetError::AddressFamilyMismatch
        })?;
        let sockif = sockif_for(family).ok_or_else(|| {
            error!("net: no socket interface for {:?}", family);
            NetError::AddressFamilyMismatch
        })?;
        let sock_type = SocketType::from_raw(ty & !(SOCK_NONBLOCK | SOCK_CLOEXEC)).ok_or_else(|| {
            error!("net: unsupported socket type {:#x}", ty);
            NetError::ProtocolNotSupported
        })?;

        let mut sock = Socket::blank(stack.clone(), family, sock_type, sockif);
        sock.protocol = protocol;
        if ty & SOCK_NONBLOCK != 0 {
            sock.flags.insert(SocketFlags::NONBLOCK);
        }
        if ty & SOCK_CLOEXEC != 0 {
            sock.flags.insert(SocketFlags::CLOEXEC);
        }

        sockif.setup(&mut sock, protocol)?;
        debug!(
            "net: socket created: {:?}/{:?} proto {} conn {:?}",
            sock.domain,
            sock.ty,
            protocol,
            sock.conn.as_ref().map(Connection::id)
        );
        Ok(sock)
    }

    /// 尚未挂接连接对象的 socket
    pub(crate) fn blank(
        stack: Arc<NetStack>,
        domain: AddressFamily,
        ty: SocketType,
        sockif: &'static dyn SockIf,
    ) -> Self {
        Self {
            domain,
            ty,
            protocol: 0,
            flags: SocketFlags::empty(),
            conn: None,
            sockif,
            stack,
            monitor: None,
        }
    }

    /// 绑定本地地址
    pub fn bind(&mut self, addr: &SockAddr) -> Result<(), NetError> {
        let sockif = self.sockif;
        sockif.bind(self, addr)
    }

    /// 开始监听
    pub fn listen(&mut self, backlog: usize) -> Result<(), NetError> {
        let sockif = self.sockif;
        sockif.listen(self, backlog)
    }

    /// 连接对端
    pub fn connect(&mut self, addr: &SockAddr) -> Result<(), NetError> {
        let sockif = self.sockif;
        sockif.connect(self, addr)
    }

    /// 接受一个连接
    ///
    /// `addr_capacity` 为调用者地址缓冲区的容量；`None` 表示不取对端地址。
    pub fn accept(&mut self, addr_capacity: Option<usize>) -> Result<(Socket, Option<SockAddr>), NetError> {
        let sockif = self.sockif;
        let mut newsock = Socket::blank(self.stack.clone(), AddressFamily::Unspec, SocketType::Stream, sockif);
        let peer = sockif.accept(self, addr_capacity, &mut newsock)?;
        Ok((newsock, peer))
    }

    /// 在已连接的 socket 上发送
    pub fn send(&mut self, buf: &[u8], flags: MsgFlags) -> Result<usize, NetError> {
        let sockif = self.sockif;
        sockif.send(self, buf, flags)
    }

    /// 发送到指定地址
    pub fn sendto(&mut self, buf: &[u8], flags: MsgFlags, to: &SockAddr) -> Result<usize, NetError> {
        let sockif = self.sockif;
        sockif.sendto(self, buf, flags, to)
    }

    /// 复制 socket，新旧 socket 共享同一个连接对象
    pub fn dup(&self) -> Socket {
        Socket {
            domain: self.domain,
            ty: self.ty,
            protocol: self.protocol,
            flags: self.flags - SocketFlags::CLOEXEC,
            conn: self.conn.as_ref().map(Connection::share),
            sockif: self.sockif,
            stack: self.stack.clone(),
            monitor: None,
        }
    }

    /// 关闭 socket，释放一个连接对象引用
    pub fn close(self) {}

    /// 地址族
    pub fn domain(&self) -> AddressFamily {
        self.domain
    }

    /// socket 类型
    pub fn socket_type(&self) -> SocketType {
        self.ty
    }

    /// 创建时的协议号
    pub fn protocol(&self) -> i32 {
        self.protocol
    }

    /// 状态标志
    pub fn flags(&self) -> SocketFlags {
        self.flags
    }

    /// 分派器
    pub fn sockif(&self) -> &'static dyn SockIf {
        self.sockif
    }

    /// 所属协议栈
    pub fn stack(&self) -> &Arc<NetStack> {
        &self.stack
    }

    /// 挂接的连接对象
    pub fn conn(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    /// 连接对象的引用计数，未挂接时为 0
    pub fn crefs(&self) -> usize {
        self.conn.as_ref().map_or(0, Connection::crefs)
    }

    /// 是否已绑定
    pub fn is_bound(&self) -> bool {
        self.flags.contains(SocketFlags::BOUND)
    }

    /// 是否已连接且连接未丢失
    pub fn is_connected(&self) -> bool {
        self.flags.contains(SocketFlags::CONNECTED) && !self.connection_lost()
    }

    /// 是否正在监听
    pub fn is_listening(&self) -> bool {
        self.flags.contains(SocketFlags::LISTENING)
    }

    /// 是否为非阻塞
    pub fn is_nonblocking(&self) -> bool {
        self.flags.contains(SocketFlags::NONBLOCK)
    }

    /// 设置非阻塞
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.flags.set(SocketFlags::NONBLOCK, nonblocking);
    }

    /// 监视到对端已断开
    pub fn connection_lost(&self) -> bool {
        self.monitor
            .as_ref()
            .is_some_and(|m| m.lost.load(Ordering::Acquire))
    }

    /// 是否处于监视中
    pub fn is_monitored(&self) -> bool {
        self.monitor.is_some()
    }

    /// 本次调用是否不应阻塞
    pub(crate) fn nonblocking_for(&self, flags: MsgFlags) -> bool {
        self.is_nonblocking() || flags.contains(MsgFlags::MSG_DONTWAIT)
    }

    #[cfg(feature = "tcp")]
    pub(crate) fn tcp_conn(&self) -> Result<&ConnRef<TcpConn>, NetError> {
        match &self.conn {
            Some(Connection::Tcp(conn)) => Ok(conn),
            _ => Err(NetError::OperationNotSupported),
        }
    }

    #[cfg(feature = "udp")]
    pub(crate) fn udp_conn(&self) -> Result<&ConnRef<UdpConn>, NetError> {
        match &self.conn {
            Some(Connection::Udp(conn)) => Ok(conn),
            _ => Err(NetError::OperationNotSupported),
        }
    }

    #[cfg(feature = "local")]
    pub(crate) fn local_conn(&self) -> Result<&ConnRef<LocalConn>, NetError> {
        match &self.conn {
            Some(Connection::Local(conn)) => Ok(conn),
            _ => Err(NetError::OperationNotSupported),
        }
    }

    #[cfg(feature = "usrsock")]
    pub(crate) fn usrsock_conn(&self) -> Result<&ConnRef<UsrsockConn>, NetError> {
        match &self.conn {
            Some(Connection::Usrsock(conn)) => Ok(conn),
            _ => Err(NetError::OperationNotSupported),
        }
    }
}

/// 把 accept 得到的连接挂到新 socket 上并开始监视
///
/// 调用者持有网络锁。监视登记失败时新 socket 的连接对象被立即释放，
/// 新 socket 回到未挂接状态，错误原样返回。
pub(crate) fn attach_accepted(core: &StackCore, newsock: &mut Socket, conn: Connection) -> Result<(), NetError> {
    newsock.conn = Some(conn);
    newsock.flags.insert(SocketFlags::BOUND | SocketFlags::CONNECTED);
    if let Err(err) = monitor::start_monitor(core, newsock) {
        error!("net: accepted connection dropped: {:?}", err);
        newsock.conn = None;
        newsock.flags.remove(SocketFlags::BOUND | SocketFlags::CONNECTED);
        return Err(err);
    }
    debug!("net: accepted conn {:?}", newsock.conn.as_ref().map(Connection::id));
    Ok(())
}

impl Drop for Socket {
    fn drop(&mut self) {
        monitor::stop_monitor(self);
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("domain", &self.domain)
            .field("ty", &self.ty)
            .field("protocol", &self.protocol)
            .field("flags", &self.flags)
            .field("conn", &self.conn)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use uapi::socket::{AF_INET, AF_INET6, IPPROTO_TCP};

    #[test]
    fn test_new_parses_creation_flags() {
        let stack = testing::stack();
        let sock = Socket::new(&stack, AF_INET, SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC, IPPROTO_TCP).unwrap();
        assert_eq!(sock.socket_type(), SocketType::Stream);
        assert!(sock.is_nonblocking());
        assert!(sock.flags().contains(SocketFlags::CLOEXEC));
        assert_eq!(sock.crefs(), 1);
        assert!(!sock.is_bound());
    }

    #[test]
    fn test_new_rejects_unknown_family_and_type() {
        let stack = testing::stack();
        assert_eq!(Socket::new(&stack, 42, SOCK_STREAM, 0).err(), Some(NetError::AddressFamilyMismatch));
        assert_eq!(Socket::new(&stack, AF_INET, 9, 0).err(), Some(NetError::ProtocolNotSupported));
    }

    #[test]
    fn test_dup_and_close_track_refcount() {
        let stack = testing::stack();
        let sock = Socket::new(&stack, AF_INET6, SOCK_DGRAM, 0).unwrap();
        let copy = sock.dup();
        let third = copy.dup();
        assert_eq!(sock.crefs(), 3);
        assert!(sock.conn().unwrap().same_as(third.conn().unwrap()));
        assert_eq!(stack.pools().udp.in_use(), 1);

        copy.close();
        assert_eq!(sock.crefs(), 2);
        drop(sock);
        assert_eq!(third.crefs(), 1);
        assert_eq!(stack.pools().udp.in_use(), 1);
        third.close();
        assert_eq!(stack.pools().udp.in_use(), 0);
    }

    #[test]
    fn test_set_nonblocking() {
        let stack = testing::stack();
        let mut sock = Socket::new(&stack, AF_INET, SOCK_DGRAM, 0).unwrap();
        assert!(!sock.nonblocking_for(MsgFlags::empty()));
        assert!(sock.nonblocking_for(MsgFlags::MSG_DONTWAIT));
        sock.set_nonblocking(true);
        assert!(sock.nonblocking_for(MsgFlags::empty()));
    }
}
