//! 本地（Unix 域）地址族分派器
//!
//! 流式与数据报两种 socket 都在内存中实现：名字登记在协议栈核心的名字空间里，
//! 流式连接是一条双向字节通道，数据报直接投递到目标连接的收件箱。

mod conn;

pub use conn::{LocalConn, LocalKind, LocalNamespace};

use log::{debug, error, warn};
use uapi::errno;
use uapi::socket::{MsgFlags, AF_UNSPEC, IPPROTO_TCP, IPPROTO_UDP, SA_FAMILY_LEN};

use crate::addr::{check_local, SockAddr};
use crate::conn::{ConnRef, Connection};
use crate::error::NetError;
use crate::monitor;
use crate::ops::net_ops;
use crate::sockif::SockIf;
use crate::socket::{attach_accepted, Socket, SocketFlags, SocketType};
use crate::stack::NetStack;
use conn::{connect_pair, LocalState, PendingLocal};

/// 本地分派器
pub struct LocalSockIf;

/// 本地分派器实例
pub static LOCAL_SOCKIF: LocalSockIf = LocalSockIf;

fn local_alloc(stack: &NetStack, kind: LocalKind) -> Result<ConnRef<LocalConn>, NetError> {
    let slot = stack.pools().local.reserve()?;
    let config = stack.config();
    let monitors = stack.monitors().clone();
    Ok(ConnRef::build(slot, |conn_id| {
        LocalConn::new(conn_id, kind, config.local_buffer_size, config.local_dgram_slots, monitors)
    }))
}

impl SockIf for LocalSockIf {
    fn setup(&self, psock: &mut Socket, protocol: i32) -> Result<(), NetError> {
        let kind = match psock.ty {
            SocketType::Stream if protocol == 0 || protocol == IPPROTO_TCP => LocalKind::Stream,
            SocketType::Dgram if protocol == 0 || protocol == IPPROTO_UDP => LocalKind::Dgram,
            _ => {
                error!("net: unsupported local socket {:?}/{}", psock.ty, protocol);
                return Err(NetError::ProtocolNotSupported);
            }
        };
        let conn = local_alloc(&psock.stack, kind)?;
        psock.conn = Some(Connection::Local(conn));
        Ok(())
    }

    fn bind(&self, psock: &mut Socket, addr: &SockAddr) -> Result<(), NetError> {
        check_local(addr)?;
        if !matches!(psock.ty, SocketType::Stream | SocketType::Dgram) {
            return Err(NetError::OperationNotSupported);
        }

        let conn = psock.local_conn()?;
        let name = addr.local_path();
        {
            let mut core = psock.stack.lock();
            let mut inner = conn.lock();
            if inner.name().is_some() {
                return Err(NetError::Backend(errno::EINVAL));
            }
            // 只有标签的地址表示不登记名字
            if !name.is_empty() {
                core.local.bind(name, conn)?;
                inner.set_name(name);
            }
        }
        debug!("net: local conn {} bound", conn.id());
        psock.flags.insert(SocketFlags::BOUND);
        Ok(())
    }

    fn listen(&self, psock: &mut Socket, backlog: usize) -> Result<(), NetError> {
        if psock.ty != SocketType::Stream {
            error!("net: listen on unsupported socket type {:?}", psock.ty);
            return Err(NetError::OperationNotSupported);
        }
        let conn = psock.local_conn()?;
        {
            let mut inner = conn.lock();
            if inner.name().is_none() {
                error!("net: listen on unnamed local socket");
                return Err(NetError::OperationNotSupported);
            }
            if inner.state() == LocalState::Connected {
                return Err(NetError::Backend(errno::EINVAL));
            }
            inner.listen(backlog.min(psock.stack.config().max_backlog))?;
        }
        psock.flags.insert(SocketFlags::LISTENING);
        Ok(())
    }

    fn connect(&self, psock: &mut Socket, addr: &SockAddr) -> Result<(), NetError> {
        match psock.ty {
            SocketType::Stream => {
                check_local(addr)?;
                if psock.flags.contains(SocketFlags::CONNECTED) {
                    error!("net: socket already connected");
                    return Err(NetError::AlreadyConnected);
                }
                local_stream_connect(psock, addr)
            }
            SocketType::Dgram => {
                if addr.family()? == AF_UNSPEC {
                    psock.local_conn()?.lock().set_peer(None);
                    psock.flags.remove(SocketFlags::CONNECTED);
                    return Ok(());
                }
                check_local(addr)?;
                local_dgram_target(&psock.stack.lock(), addr)?;
                psock.local_conn()?.lock().set_peer(Some(addr.clone()));
                psock.flags.insert(SocketFlags::CONNECTED);
                Ok(())
            }
            _ => Err(NetError::OperationNotSupported),
        }
    }

    fn accept(
        &self,
        psock: &mut Socket,
        addr_capacity: Option<usize>,
        newsock: &mut Socket,
    ) -> Result<Option<SockAddr>, NetError> {
        if psock.ty != SocketType::Stream {
            error!("net: accept on unsupported socket type {:?}", psock.ty);
            return Err(NetError::OperationNotSupported);
        }
        if addr_capacity.is_some_and(|capacity| capacity < SA_FAMILY_LEN) {
            error!("net: address buffer too small for a local address");
            return Err(NetError::AddressTooShort);
        }

        newsock.domain = psock.domain;
        newsock.ty = psock.ty;
        newsock.protocol = psock.protocol;
        newsock.sockif = psock.sockif;

        let listener = psock.local_conn()?;
        let nonblock = psock.is_nonblocking();
        let stack = psock.stack.clone();
        let mut core = stack.lock();
        loop {
            let pending = {
                let mut inner = listener.lock();
                if !inner.is_listening() {
                    return Err(NetError::Backend(errno::EINVAL));
                }
                inner.dequeue()
            };

            if let Some(PendingLocal { conn, peer }) = pending {
                attach_accepted(&core, newsock, Connection::Local(conn))?;
                return Ok(addr_capacity.map(|_| peer));
            }
            if nonblock {
                return Err(NetError::WouldBlock);
            }
            if !core.unlocked(|| net_ops().wait_net_event()) {
                return Err(NetError::Interrupted);
            }
        }
    }

    fn send(&self, psock: &mut Socket, buf: &[u8], flags: MsgFlags) -> Result<usize, NetError> {
        let nonblock = psock.nonblocking_for(flags);
        match psock.ty {
            SocketType::Stream => local_stream_send(psock.local_conn()?, buf, nonblock),
            SocketType::Dgram => {
                let to = psock.local_conn()?.lock().peer_addr().cloned().ok_or_else(|| {
                    error!("net: send on unassociated local datagram socket");
                    NetError::DestinationRequired
                })?;
                local_dgram_send(psock, buf, &to, nonblock)
            }
            _ => Err(NetError::DestinationRequired),
        }
    }

    fn sendto(
        &self,
        psock: &mut Socket,
        buf: &[u8],
        flags: MsgFlags,
        to: &SockAddr,
    ) -> Result<usize, NetError> {
        check_local(to)?;
        if psock.ty != SocketType::Dgram {
            error!("net: sendto on connection-mode local socket");
            return Err(NetError::AlreadyConnected);
        }
        local_dgram_send(psock, buf, to, psock.nonblocking_for(flags))
    }
}

/// 连接到监听中的本地 socket
///
/// 服务端连接对象在这里分配并放进监听方的 backlog，accept 时再挂到新 socket 上。
fn local_stream_connect(psock: &mut Socket, addr: &SockAddr) -> Result<(), NetError> {
    let stack = psock.stack.clone();
    let core = stack.lock();
    let client = psock.local_conn()?;
    let refused = || {
        warn!("net: local connect to {:?} refused", addr);
        NetError::Backend(errno::ECONNREFUSED)
    };

    let listener = core
        .local
        .lookup(addr.local_path())
        .filter(|l| !ConnRef::ptr_eq(l, client))
        .ok_or_else(refused)?;
    {
        let mut listener_inner = listener.lock();
        if !listener_inner.can_enqueue() {
            return Err(refused());
        }
        let mut client_inner = client.lock();
        if client_inner.state() != LocalState::Idle {
            return Err(NetError::Backend(errno::EINVAL));
        }

        let server = local_alloc(&stack, LocalKind::Stream)?;
        let peer = client_inner.local_addr();
        {
            let mut server_inner = server.lock();
            connect_pair(&mut client_inner, &mut server_inner, stack.config().local_buffer_size);
            if let Some(name) = listener_inner.name() {
                server_inner.set_name(name);
            }
            server_inner.set_peer(Some(peer.clone()));
        }
        client_inner.set_peer(Some(addr.clone()));
        debug!("net: local conn {} queued as {} for accept", client.id(), server.id());
        listener_inner
            .enqueue(PendingLocal { conn: server, peer })
            .map_err(|_| refused())?;
    }

    psock.flags.insert(SocketFlags::CONNECTED);
    if let Err(err) = monitor::start_monitor(&core, psock) {
        psock.flags.remove(SocketFlags::CONNECTED);
        return Err(err);
    }
    drop(core);
    net_ops().wake_poll_waiters();
    Ok(())
}

fn local_stream_send(conn: &ConnRef<LocalConn>, buf: &[u8], nonblock: bool) -> Result<usize, NetError> {
    loop {
        let sent = conn.lock().write_stream(buf)?;
        if sent > 0 || buf.is_empty() {
            net_ops().wake_poll_waiters();
            return Ok(sent);
        }
        if nonblock {
            return Err(NetError::WouldBlock);
        }
        if !net_ops().wait_net_event() {
            return Err(NetError::Interrupted);
        }
    }
}

/// 按名字找到数据报目标
fn local_dgram_target(core: &crate::stack::StackCore, to: &SockAddr) -> Result<ConnRef<LocalConn>, NetError> {
    core.local
        .lookup(to.local_path())
        .filter(|target| target.lock().kind() == LocalKind::Dgram)
        .ok_or_else(|| {
            warn!("net: no local datagram socket at the target name");
            NetError::Backend(errno::ECONNREFUSED)
        })
}

fn local_dgram_send(psock: &Socket, buf: &[u8], to: &SockAddr, nonblock: bool) -> Result<usize, NetError> {
    let from = psock.local_conn()?.lock().local_addr();
    let mut core = psock.stack.lock();
    let target = local_dgram_target(&core, to)?;
    let mut datagram = (from, buf.to_vec());
    loop {
        {
            let mut inner = target.lock();
            if buf.len() > inner.max_datagram() {
                return Err(NetError::Backend(errno::EMSGSIZE));
            }
            match inner.deliver(datagram) {
                Ok(()) => break,
                Err(back) => datagram = back,
            }
        }
        if nonblock {
            return Err(NetError::WouldBlock);
        }
        if !core.unlocked(|| net_ops().wait_net_event()) {
            return Err(NetError::Interrupted);
        }
    }
    drop(core);
    net_ops().wake_poll_waiters();
    Ok(buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testing, AddressFamily};
    use alloc::sync::Arc;
    use uapi::socket::{AF_LOCAL, SOCK_DGRAM, SOCK_NONBLOCK, SOCK_RAW, SOCK_STREAM};

    fn stream(stack: &Arc<NetStack>) -> Socket {
        Socket::new(stack, AF_LOCAL, SOCK_STREAM | SOCK_NONBLOCK, 0).unwrap()
    }

    fn dgram(stack: &Arc<NetStack>) -> Socket {
        Socket::new(stack, AF_LOCAL, SOCK_DGRAM, 0).unwrap()
    }

    fn listening(stack: &Arc<NetStack>, path: &[u8], backlog: usize) -> Socket {
        let mut server = stream(stack);
        server.bind(&SockAddr::local(path)).unwrap();
        server.listen(backlog).unwrap();
        server
    }

    #[test]
    fn test_setup() {
        let stack = testing::stack();
        let sock = stream(&stack);
        assert_eq!(sock.domain(), AddressFamily::Local);
        assert_eq!(sock.crefs(), 1);
        assert_eq!(stack.pools().local.in_use(), 1);
        assert_eq!(
            Socket::new(&stack, AF_LOCAL, SOCK_STREAM, IPPROTO_UDP).err(),
            Some(NetError::ProtocolNotSupported)
        );
        assert_eq!(Socket::new(&stack, AF_LOCAL, SOCK_RAW, 0).err(), Some(NetError::ProtocolNotSupported));
    }

    #[test]
    fn test_bind_validation_and_conflict() {
        let stack = testing::stack();
        let mut sock = stream(&stack);
        assert_eq!(
            sock.bind(&SockAddr::inet([127, 0, 0, 1], 1)),
            Err(NetError::AddressFamilyMismatch)
        );
        assert_eq!(sock.bind(&SockAddr::from_bytes(&[1])), Err(NetError::AddressTooShort));
        sock.bind(&SockAddr::local(b"/run/a")).unwrap();
        assert!(sock.is_bound());
        assert_eq!(sock.bind(&SockAddr::local(b"/run/b")), Err(NetError::Backend(errno::EINVAL)));

        let mut other = dgram(&stack);
        assert_eq!(
            other.bind(&SockAddr::local(b"/run/a")),
            Err(NetError::Backend(errno::EADDRINUSE))
        );

        // 原持有者关闭后名字可以复用
        sock.close();
        other.bind(&SockAddr::local(b"/run/a")).unwrap();
    }

    #[test]
    fn test_listen_requires_name() {
        let stack = testing::stack();
        let mut sock = stream(&stack);
        assert_eq!(sock.listen(4), Err(NetError::OperationNotSupported));
        sock.bind(&SockAddr::unnamed_local()).unwrap();
        assert_eq!(sock.listen(4), Err(NetError::OperationNotSupported));

        let mut d = dgram(&stack);
        assert_eq!(d.listen(1), Err(NetError::OperationNotSupported));
    }

    #[test]
    fn test_stream_connect_accept_send() {
        let stack = testing::stack();
        let mut server = listening(&stack, b"/run/srv", 2);

        let mut client = stream(&stack);
        client.bind(&SockAddr::local(b"/run/cli")).unwrap();
        client.connect(&SockAddr::local(b"/run/srv")).unwrap();
        assert!(client.is_connected());
        assert!(client.is_monitored());
        assert_eq!(
            client.connect(&SockAddr::local(b"/run/srv")),
            Err(NetError::AlreadyConnected)
        );

        let (mut accepted, peer) = server.accept(Some(SOCKADDR_LEN)).unwrap();
        assert_eq!(peer, Some(SockAddr::local(b"/run/cli")));
        assert!(accepted.is_connected());
        assert!(accepted.is_monitored());
        assert!(!accepted.conn().unwrap().same_as(server.conn().unwrap()));
        assert!(server.is_listening());
        assert!(server.is_bound());

        assert_eq!(client.send(b"hello", MsgFlags::empty()), Ok(5));
        assert_eq!(accepted.local_conn().unwrap().lock().read_stream(), b"hello");
        assert_eq!(accepted.send(b"ok", MsgFlags::empty()), Ok(2));
        assert_eq!(client.local_conn().unwrap().lock().read_stream(), b"ok");

        assert_eq!(
            client.sendto(b"x", MsgFlags::empty(), &SockAddr::local(b"/run/srv")),
            Err(NetError::AlreadyConnected)
        );
        assert_eq!(server.accept(None).err(), Some(NetError::WouldBlock));
        assert!(!stack.is_locked());
    }

    const SOCKADDR_LEN: usize = uapi::socket::SOCKADDR_UN_LEN;

    #[test]
    fn test_connect_refused() {
        let stack = testing::stack();
        let mut client = stream(&stack);
        assert_eq!(
            client.connect(&SockAddr::local(b"/run/missing")),
            Err(NetError::Backend(errno::ECONNREFUSED))
        );

        // 已命名但没有监听
        let mut idle = stream(&stack);
        idle.bind(&SockAddr::local(b"/run/idle")).unwrap();
        assert_eq!(
            client.connect(&SockAddr::local(b"/run/idle")),
            Err(NetError::Backend(errno::ECONNREFUSED))
        );

        // backlog 满
        let _server = listening(&stack, b"/run/full", 1);
        let mut first = stream(&stack);
        first.connect(&SockAddr::local(b"/run/full")).unwrap();
        assert_eq!(
            client.connect(&SockAddr::local(b"/run/full")),
            Err(NetError::Backend(errno::ECONNREFUSED))
        );
        assert!(!client.is_connected());
    }

    #[test]
    fn test_accept_rolls_back_when_peer_is_gone() {
        let stack = testing::stack();
        let mut server = listening(&stack, b"/run/gone", 1);
        let mut client = stream(&stack);
        client.connect(&SockAddr::local(b"/run/gone")).unwrap();
        assert_eq!(stack.pools().local.in_use(), 3);

        client.close();
        assert_eq!(server.accept(None).err(), Some(NetError::NotConnected));
        // 服务端连接对象已销毁，只剩监听 socket
        assert_eq!(stack.pools().local.in_use(), 1);
        assert!(!stack.is_locked());
        assert!(stack.monitors().is_empty());
    }

    #[test]
    fn test_peer_close_marks_connection_lost() {
        let stack = testing::stack();
        let mut server = listening(&stack, b"/run/lost", 1);
        let mut client = stream(&stack);
        client.connect(&SockAddr::local(b"/run/lost")).unwrap();
        let (accepted, _) = server.accept(None).unwrap();

        accepted.close();
        assert!(client.connection_lost());
        assert!(!client.is_connected());
        assert_eq!(client.send(b"x", MsgFlags::empty()), Err(NetError::Backend(errno::EPIPE)));
    }

    #[test]
    fn test_accept_validation() {
        let stack = testing::stack();
        let mut server = listening(&stack, b"/run/v", 1);
        assert_eq!(server.accept(Some(1)).err(), Some(NetError::AddressTooShort));
        server.set_nonblocking(false);
        assert_eq!(server.accept(None).err(), Some(NetError::Interrupted));

        let mut d = dgram(&stack);
        assert_eq!(d.accept(None).err(), Some(NetError::OperationNotSupported));
    }

    #[test]
    fn test_stream_send_blocks_when_full() {
        let mut config = crate::NetConfig::default();
        config.local_buffer_size = 4;
        let stack = testing::stack_with(config);
        let _server = listening(&stack, b"/run/small", 1);
        let mut client = stream(&stack);
        client.connect(&SockAddr::local(b"/run/small")).unwrap();

        assert_eq!(client.send(b"abcdef", MsgFlags::empty()), Ok(4));
        assert_eq!(client.send(b"g", MsgFlags::empty()), Err(NetError::WouldBlock));
        client.set_nonblocking(false);
        assert_eq!(client.send(b"g", MsgFlags::empty()), Err(NetError::Interrupted));
    }

    #[test]
    fn test_send_before_connect() {
        let stack = testing::stack();
        let mut client = stream(&stack);
        assert_eq!(client.send(b"x", MsgFlags::empty()), Err(NetError::NotConnected));
        let mut d = dgram(&stack);
        assert_eq!(d.send(b"x", MsgFlags::empty()), Err(NetError::DestinationRequired));
    }

    #[test]
    fn test_datagram_delivery() {
        let stack = testing::stack();
        let mut receiver = dgram(&stack);
        receiver.bind(&SockAddr::local(b"/run/rx")).unwrap();
        let mut sender = dgram(&stack);
        sender.bind(&SockAddr::local(b"/run/tx")).unwrap();

        let rx = SockAddr::local(b"/run/rx");
        assert_eq!(sender.sendto(b"one", MsgFlags::empty(), &rx), Ok(3));
        sender.connect(&rx).unwrap();
        assert!(sender.flags().contains(SocketFlags::CONNECTED));
        assert_eq!(sender.send(b"two", MsgFlags::empty()), Ok(3));

        let rx_conn = receiver.local_conn().unwrap();
        let (from, data) = rx_conn.lock().take_datagram().unwrap();
        assert_eq!(from, SockAddr::local(b"/run/tx"));
        assert_eq!(data, b"one");
        assert_eq!(rx_conn.lock().take_datagram().unwrap().1, b"two");

        sender.connect(&SockAddr::unspec()).unwrap();
        assert!(!sender.flags().contains(SocketFlags::CONNECTED));
        assert_eq!(sender.send(b"x", MsgFlags::empty()), Err(NetError::DestinationRequired));

        assert_eq!(
            sender.sendto(b"x", MsgFlags::empty(), &SockAddr::local(b"/run/none")),
            Err(NetError::Backend(errno::ECONNREFUSED))
        );
        assert_eq!(
            sender.sendto(b"x", MsgFlags::empty(), &SockAddr::inet([127, 0, 0, 1], 1)),
            Err(NetError::AddressFamilyMismatch)
        );
    }

    #[test]
    fn test_datagram_inbox_full() {
        let mut config = crate::NetConfig::default();
        config.local_dgram_slots = 1;
        let stack = testing::stack_with(config);
        let mut receiver = dgram(&stack);
        receiver.bind(&SockAddr::local(b"/run/one")).unwrap();
        let mut sender = Socket::new(&stack, AF_LOCAL, SOCK_DGRAM | SOCK_NONBLOCK, 0).unwrap();
        let to = SockAddr::local(b"/run/one");
        assert_eq!(sender.sendto(b"a", MsgFlags::empty(), &to), Ok(1));
        assert_eq!(sender.sendto(b"b", MsgFlags::empty(), &to), Err(NetError::WouldBlock));
    }
}
