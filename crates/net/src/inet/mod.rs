//! inet 地址族分派器（IPv4/IPv6）
//!
//! 先校验参数（地址族标签、地址长度、socket 类型），再按 socket 类型选择后端：
//! 流式交给 [`tcp`]，数据报交给 [`udp`]，被外部提供者接管的交给 [`crate::usrsock`]。
//! 参数错误在这里直接返回，不会转发给后端；后端的错误原样返回。

#[cfg(any(feature = "tcp", feature = "udp"))]
pub(crate) mod iface;
#[cfg(any(feature = "tcp", feature = "udp"))]
mod port;
#[cfg(feature = "tcp")]
pub mod tcp;
#[cfg(feature = "udp")]
pub mod udp;

use log::{error, warn};
use smoltcp::wire::IpEndpoint;
use uapi::socket::{MsgFlags, AF_UNSPEC, IPPROTO_TCP, IPPROTO_UDP};

use crate::addr::{check_inet, SockAddr};
#[allow(unused_imports)]
use crate::conn::Connection;
use crate::error::NetError;
use crate::sockif::SockIf;
use crate::socket::{Socket, SocketFlags, SocketType};

/// inet 分派器
pub struct InetSockIf;

/// inet 分派器实例，IPv4 与 IPv6 共用
pub static INET_SOCKIF: InetSockIf = InetSockIf;

impl SockIf for InetSockIf {
    fn setup(&self, psock: &mut Socket, protocol: i32) -> Result<(), NetError> {
        #[cfg(feature = "usrsock")]
        if crate::usrsock::usrsock_socket_setup(psock, protocol)? {
            return Ok(());
        }

        match psock.ty {
            SocketType::Stream => {
                if protocol != 0 && protocol != IPPROTO_TCP {
                    error!("net: unsupported stream protocol {}", protocol);
                    return Err(NetError::ProtocolNotSupported);
                }
                inet_tcp_alloc(psock)
            }
            SocketType::Dgram => {
                if protocol != 0 && protocol != IPPROTO_UDP {
                    error!("net: unsupported datagram protocol {}", protocol);
                    return Err(NetError::ProtocolNotSupported);
                }
                inet_udp_alloc(psock)
            }
            _ => {
                error!("net: unsupported socket type {:?}", psock.ty);
                Err(NetError::ProtocolNotSupported)
            }
        }
    }

    fn bind(&self, psock: &mut Socket, addr: &SockAddr) -> Result<(), NetError> {
        check_inet(addr)?;

        let result = match psock.ty {
            #[cfg(feature = "usrsock")]
            SocketType::Usrsock => return crate::usrsock::usrsock_bind(psock.usrsock_conn()?, addr),
            SocketType::Stream => inet_tcp_bind(psock, addr),
            SocketType::Dgram => inet_udp_bind(psock, addr),
            _ => Err(NetError::OperationNotSupported),
        };
        if let Err(err) = result {
            error!("net: bind failed on {:?}: {:?}", psock.ty, err);
            return Err(err);
        }

        psock.flags.insert(SocketFlags::BOUND);
        Ok(())
    }

    fn listen(&self, psock: &mut Socket, backlog: usize) -> Result<(), NetError> {
        if psock.ty != SocketType::Stream {
            error!("net: listen on unsupported socket type {:?}", psock.ty);
            return Err(NetError::OperationNotSupported);
        }
        inet_tcp_listen(psock, backlog)?;
        psock.flags.insert(SocketFlags::LISTENING);
        Ok(())
    }

    fn connect(&self, psock: &mut Socket, addr: &SockAddr) -> Result<(), NetError> {
        match psock.ty {
            SocketType::Stream => {
                check_inet(addr)?;
                if psock.flags.contains(SocketFlags::CONNECTED) {
                    error!("net: socket already connected");
                    return Err(NetError::AlreadyConnected);
                }
                inet_tcp_connect(psock, addr)
            }
            SocketType::Dgram => {
                if addr.family()? == AF_UNSPEC {
                    return inet_udp_connect(psock, None);
                }
                check_inet(addr)?;
                inet_udp_connect(psock, Some(addr))
            }
            _ => {
                error!("net: connect on unsupported socket type {:?}", psock.ty);
                Err(NetError::OperationNotSupported)
            }
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
        if let Some(capacity) = addr_capacity {
            let min = psock.domain.min_addr_len();
            if capacity < min {
                error!("net: address buffer too small: {} < {}", capacity, min);
                return Err(NetError::AddressTooShort);
            }
        }

        newsock.domain = psock.domain;
        newsock.ty = psock.ty;
        newsock.protocol = psock.protocol;
        newsock.sockif = psock.sockif;

        let remote = inet_tcp_accept(psock, newsock)?;
        Ok(addr_capacity.map(|_| SockAddr::from_endpoint(remote)))
    }

    fn send(&self, psock: &mut Socket, buf: &[u8], flags: MsgFlags) -> Result<usize, NetError> {
        match psock.ty {
            SocketType::Stream => inet_tcp_send(psock, buf, flags),
            SocketType::Dgram => inet_udp_send(psock, buf, flags),
            #[cfg(feature = "usrsock")]
            SocketType::Usrsock => crate::usrsock::usrsock_sendto(psock.usrsock_conn()?, buf, flags, None),
            _ => {
                error!("net: send on unsupported socket type {:?}", psock.ty);
                Err(NetError::DestinationRequired)
            }
        }
    }

    fn sendto(
        &self,
        psock: &mut Socket,
        buf: &[u8],
        flags: MsgFlags,
        to: &SockAddr,
    ) -> Result<usize, NetError> {
        #[cfg(feature = "usrsock")]
        if psock.ty == SocketType::Usrsock {
            return crate::usrsock::usrsock_sendto(psock.usrsock_conn()?, buf, flags, Some(to));
        }

        check_inet(to)?;
        if psock.ty != SocketType::Dgram {
            error!("net: sendto on connection-mode socket");
            return Err(NetError::AlreadyConnected);
        }
        inet_udp_sendto(psock, buf, flags, to)
    }
}

#[cfg(feature = "tcp")]
fn inet_tcp_alloc(psock: &mut Socket) -> Result<(), NetError> {
    let conn = tcp::tcp_alloc(&psock.stack, psock.domain)
        .inspect_err(|err| error!("net: failed to allocate a tcp connection: {:?}", err))?;
    psock.conn = Some(Connection::Tcp(conn));
    Ok(())
}

#[cfg(not(feature = "tcp"))]
fn inet_tcp_alloc(_psock: &mut Socket) -> Result<(), NetError> {
    warn!("net: SOCK_STREAM disabled");
    Err(NetError::ProtocolNotSupported)
}

#[cfg(feature = "udp")]
fn inet_udp_alloc(psock: &mut Socket) -> Result<(), NetError> {
    let conn = udp::udp_alloc(&psock.stack, psock.domain)
        .inspect_err(|err| error!("net: failed to allocate a udp connection: {:?}", err))?;
    psock.conn = Some(Connection::Udp(conn));
    Ok(())
}

#[cfg(not(feature = "udp"))]
fn inet_udp_alloc(_psock: &mut Socket) -> Result<(), NetError> {
    warn!("net: SOCK_DGRAM disabled");
    Err(NetError::ProtocolNotSupported)
}

#[cfg(feature = "tcp")]
fn inet_tcp_bind(psock: &Socket, addr: &SockAddr) -> Result<(), NetError> {
    let local = addr.to_endpoint()?;
    let mut core = psock.stack.lock();
    tcp::tcp_bind(&mut core.inet, psock.tcp_conn()?, local)
}

#[cfg(not(feature = "tcp"))]
fn inet_tcp_bind(_psock: &Socket, _addr: &SockAddr) -> Result<(), NetError> {
    Err(NetError::OperationNotSupported)
}

#[cfg(feature = "udp")]
fn inet_udp_bind(psock: &Socket, addr: &SockAddr) -> Result<(), NetError> {
    let local = addr.to_endpoint()?;
    let mut core = psock.stack.lock();
    udp::udp_bind(&mut core.inet, psock.udp_conn()?, local)
}

#[cfg(not(feature = "udp"))]
fn inet_udp_bind(_psock: &Socket, _addr: &SockAddr) -> Result<(), NetError> {
    Err(NetError::OperationNotSupported)
}

#[cfg(feature = "tcp")]
fn inet_tcp_listen(psock: &Socket, backlog: usize) -> Result<(), NetError> {
    let conn = psock.tcp_conn()?;
    if conn.lock().local_port() == 0 {
        error!("net: listen on unbound socket");
        return Err(NetError::OperationNotSupported);
    }

    #[cfg(feature = "tcp-backlog")]
    tcp::tcp_backlogcreate(conn, backlog.min(psock.stack.config().max_backlog))
        .inspect_err(|err| error!("net: failed to create the backlog: {:?}", err))?;
    #[cfg(not(feature = "tcp-backlog"))]
    let _ = backlog;

    let mut core = psock.stack.lock();
    tcp::tcp_listen(&mut core.inet, conn).inspect_err(|err| error!("net: tcp listen failed: {:?}", err))?;
    Ok(())
}

#[cfg(not(feature = "tcp"))]
fn inet_tcp_listen(_psock: &Socket, _backlog: usize) -> Result<(), NetError> {
    Err(NetError::OperationNotSupported)
}

#[cfg(feature = "tcp")]
fn inet_tcp_connect(psock: &mut Socket, addr: &SockAddr) -> Result<(), NetError> {
    let remote = addr.to_endpoint()?;
    let stack = psock.stack.clone();
    let mut core = stack.lock();
    tcp::tcp_connect(&mut core, psock, remote)
}

#[cfg(not(feature = "tcp"))]
fn inet_tcp_connect(_psock: &mut Socket, _addr: &SockAddr) -> Result<(), NetError> {
    Err(NetError::OperationNotSupported)
}

#[cfg(feature = "udp")]
fn inet_udp_connect(psock: &mut Socket, addr: Option<&SockAddr>) -> Result<(), NetError> {
    let remote = addr.map(SockAddr::to_endpoint).transpose()?;
    {
        let mut core = psock.stack.lock();
        udp::udp_connect(&mut core.inet, psock.udp_conn()?, remote)?;
    }
    psock.flags.set(SocketFlags::CONNECTED, remote.is_some());
    Ok(())
}

#[cfg(not(feature = "udp"))]
fn inet_udp_connect(_psock: &mut Socket, _addr: Option<&SockAddr>) -> Result<(), NetError> {
    Err(NetError::OperationNotSupported)
}

#[cfg(feature = "tcp")]
fn inet_tcp_accept(psock: &Socket, newsock: &mut Socket) -> Result<IpEndpoint, NetError> {
    let mut core = psock.stack.lock();
    let (remote, conn) = tcp::tcp_accept(&mut core, psock.tcp_conn()?, psock.is_nonblocking())
        .inspect_err(|err| warn!("net: accept failed: {:?}", err))?;
    crate::socket::attach_accepted(&core, newsock, Connection::Tcp(conn))?;
    Ok(remote)
}

#[cfg(not(feature = "tcp"))]
fn inet_tcp_accept(_psock: &Socket, _newsock: &mut Socket) -> Result<IpEndpoint, NetError> {
    Err(NetError::OperationNotSupported)
}

#[cfg(feature = "tcp")]
fn inet_tcp_send(psock: &Socket, buf: &[u8], flags: MsgFlags) -> Result<usize, NetError> {
    let conn = psock.tcp_conn()?;
    let nonblock = psock.nonblocking_for(flags);
    let remote = conn.lock().remote_endpoint();
    crate::sixlowpan::send_with_fallback(
        &psock.stack,
        |sender| sender.tcp_send(conn.id(), remote, buf),
        || tcp::tcp_send(&psock.stack, conn, buf, nonblock),
    )
}

#[cfg(not(feature = "tcp"))]
fn inet_tcp_send(_psock: &Socket, _buf: &[u8], _flags: MsgFlags) -> Result<usize, NetError> {
    Err(NetError::OperationNotSupported)
}

#[cfg(feature = "udp")]
fn inet_udp_send(psock: &Socket, buf: &[u8], flags: MsgFlags) -> Result<usize, NetError> {
    let conn = psock.udp_conn()?;
    let nonblock = psock.nonblocking_for(flags);
    let remote = conn.lock().remote_endpoint().ok_or_else(|| {
        error!("net: send on unassociated datagram socket");
        NetError::DestinationRequired
    })?;
    crate::sixlowpan::send_with_fallback(
        &psock.stack,
        |sender| sender.udp_send(conn.id(), remote, buf),
        || udp::udp_send(&psock.stack, conn, buf, nonblock),
    )
}

#[cfg(not(feature = "udp"))]
fn inet_udp_send(_psock: &Socket, _buf: &[u8], _flags: MsgFlags) -> Result<usize, NetError> {
    Err(NetError::OperationNotSupported)
}

#[cfg(feature = "udp")]
fn inet_udp_sendto(psock: &Socket, buf: &[u8], flags: MsgFlags, to: &SockAddr) -> Result<usize, NetError> {
    let remote = to.to_endpoint()?;
    let conn = psock.udp_conn()?;
    if conn.lock().remote_endpoint().is_some() {
        error!("net: sendto with a destination on an associated datagram socket");
        return Err(NetError::AlreadyConnected);
    }
    let nonblock = psock.nonblocking_for(flags);
    crate::sixlowpan::send_with_fallback(
        &psock.stack,
        |sender| sender.udp_sendto(conn.id(), buf, flags, remote),
        || udp::udp_sendto(&psock.stack, conn, buf, remote, nonblock),
    )
}

#[cfg(not(feature = "udp"))]
fn inet_udp_sendto(_psock: &Socket, _buf: &[u8], _flags: MsgFlags, _to: &SockAddr) -> Result<usize, NetError> {
    Err(NetError::OperationNotSupported)
}

#[cfg(all(test, feature = "tcp", feature = "udp"))]
mod tests {
    use super::*;
    use crate::testing;
    use alloc::sync::Arc;
    use uapi::errno;
    use uapi::socket::{AF_INET, AF_INET6, SOCK_DGRAM, SOCK_NONBLOCK, SOCK_RAW, SOCK_STREAM, SOCKADDR_IN_LEN};

    use crate::stack::NetStack;

    const LOCALHOST: [u8; 4] = [127, 0, 0, 1];

    fn stack() -> Arc<NetStack> {
        // 不注册外部提供者时 usrsock 不参与
        testing::stack()
    }

    fn tcp_socket(stack: &Arc<NetStack>) -> Socket {
        Socket::new(stack, AF_INET, SOCK_STREAM | SOCK_NONBLOCK, 0).unwrap()
    }

    fn udp_socket(stack: &Arc<NetStack>) -> Socket {
        Socket::new(stack, AF_INET, SOCK_DGRAM, 0).unwrap()
    }

    fn retry_while_blocked<T>(stack: &NetStack, mut op: impl FnMut() -> Result<T, NetError>) -> Result<T, NetError> {
        for _ in 0..64 {
            match op() {
                Err(NetError::WouldBlock) => stack.poll(),
                other => return other,
            }
        }
        op()
    }

    #[test]
    fn test_setup_checks_protocol() {
        let stack = stack();
        assert_eq!(
            Socket::new(&stack, AF_INET, SOCK_STREAM, IPPROTO_UDP).err(),
            Some(NetError::ProtocolNotSupported)
        );
        assert_eq!(
            Socket::new(&stack, AF_INET, SOCK_DGRAM, IPPROTO_TCP).err(),
            Some(NetError::ProtocolNotSupported)
        );
        assert_eq!(Socket::new(&stack, AF_INET, SOCK_RAW, 0).err(), Some(NetError::ProtocolNotSupported));
        assert_eq!(stack.pools().tcp.in_use(), 0);
        assert_eq!(stack.pools().udp.in_use(), 0);

        let sock = Socket::new(&stack, AF_INET6, SOCK_STREAM, IPPROTO_TCP).unwrap();
        assert_eq!(sock.domain(), crate::AddressFamily::Inet6);
        assert_eq!(sock.crefs(), 1);
        assert_eq!(stack.pools().tcp.in_use(), 1);
    }

    #[test]
    fn test_setup_reports_pool_exhaustion() {
        let stack = testing::stack_with(crate::NetConfig::default().with_pool_sizes(1, 1, 1));
        let _first = Socket::new(&stack, AF_INET, SOCK_STREAM, 0).unwrap();
        assert_eq!(
            Socket::new(&stack, AF_INET, SOCK_STREAM, 0).err(),
            Some(NetError::ResourceExhausted)
        );
    }

    #[test]
    fn test_bind_validates_address() {
        let stack = stack();
        let mut sock = tcp_socket(&stack);

        let mut unix = SockAddr::local(b"/tmp/x");
        assert_eq!(sock.bind(&unix), Err(NetError::AddressFamilyMismatch));
        unix = SockAddr::inet(LOCALHOST, 80).truncated(SOCKADDR_IN_LEN - 1);
        assert_eq!(sock.bind(&unix), Err(NetError::AddressTooShort));
        assert!(!sock.is_bound());

        sock.bind(&SockAddr::inet(LOCALHOST, 8080)).unwrap();
        assert!(sock.is_bound());
        assert_eq!(sock.tcp_conn().unwrap().lock().local_port(), 8080);

        let mut other = tcp_socket(&stack);
        assert_eq!(
            other.bind(&SockAddr::inet(LOCALHOST, 8080)),
            Err(NetError::Backend(errno::EADDRINUSE))
        );
        assert_eq!(
            other.bind(&SockAddr::inet([10, 0, 0, 1], 8081)),
            Err(NetError::Backend(errno::EADDRNOTAVAIL))
        );
    }

    #[test]
    fn test_listen_requires_bound_stream() {
        let stack = stack();
        let mut dgram = udp_socket(&stack);
        assert_eq!(dgram.listen(4), Err(NetError::OperationNotSupported));

        let mut stream = tcp_socket(&stack);
        assert_eq!(stream.listen(4), Err(NetError::OperationNotSupported));
        assert_eq!(stream.tcp_conn().unwrap().lock().backlog_capacity(), None);

        stream.bind(&SockAddr::inet(LOCALHOST, 9000)).unwrap();
        stream.listen(100).unwrap();
        assert!(stream.is_listening());
        // 深度被截断到 max_backlog
        assert_eq!(stream.tcp_conn().unwrap().lock().backlog_capacity(), Some(8));
    }

    #[test]
    fn test_connect_validation() {
        let stack = stack();
        let mut sock = tcp_socket(&stack);
        assert_eq!(
            sock.connect(&SockAddr::local(b"/tmp/x")),
            Err(NetError::AddressFamilyMismatch)
        );
        assert_eq!(
            sock.connect(&SockAddr::inet(LOCALHOST, 1).truncated(4)),
            Err(NetError::AddressTooShort)
        );
    }

    #[test]
    fn test_connect_refused_without_listener() {
        let stack = stack();
        let mut sock = tcp_socket(&stack);
        let result = retry_while_blocked(&stack, || sock.connect(&SockAddr::inet(LOCALHOST, 9999)));
        assert_eq!(result, Err(NetError::Backend(errno::ECONNREFUSED)));
        assert!(!sock.is_connected());
    }

    #[test]
    fn test_loopback_handshake_and_send() {
        let stack = stack();
        let mut server = tcp_socket(&stack);
        server.bind(&SockAddr::inet(LOCALHOST, 7000)).unwrap();
        server.listen(2).unwrap();

        let mut client = tcp_socket(&stack);
        let target = SockAddr::inet(LOCALHOST, 7000);
        retry_while_blocked(&stack, || client.connect(&target)).unwrap();
        assert!(client.is_connected());
        assert!(client.is_monitored());
        assert_eq!(client.connect(&target), Err(NetError::AlreadyConnected));

        let (accepted, peer) = retry_while_blocked(&stack, || server.accept(Some(SOCKADDR_IN_LEN))).unwrap();
        let client_port = client.tcp_conn().unwrap().lock().local_port();
        assert_eq!(peer, Some(SockAddr::inet(LOCALHOST, client_port)));
        assert_eq!(accepted.crefs(), 1);
        assert!(accepted.is_connected());
        assert!(accepted.is_monitored());
        assert!(!accepted.is_nonblocking());
        assert_eq!(accepted.socket_type(), SocketType::Stream);
        assert_eq!(stack.pools().tcp.in_use(), 3);

        assert_eq!(client.send(b"ping", MsgFlags::empty()), Ok(4));
        assert_eq!(
            client.sendto(b"ping", MsgFlags::empty(), &target),
            Err(NetError::AlreadyConnected)
        );
        assert!(!stack.is_locked());
    }

    #[test]
    fn test_accept_rolls_back_when_peer_gone() {
        let stack = stack();
        // 从未建立过连接，启动监视时视为对端已断开
        let conn = tcp::tcp_alloc(&stack, crate::AddressFamily::Inet).unwrap();
        let handle = conn.lock().handle();
        let mut newsock = Socket::blank(stack.clone(), crate::AddressFamily::Inet, SocketType::Stream, &INET_SOCKIF);
        assert_eq!(stack.pools().tcp.in_use(), 1);
        {
            let core = stack.lock();
            let result = crate::socket::attach_accepted(&core, &mut newsock, Connection::Tcp(conn));
            assert_eq!(result, Err(NetError::NotConnected));
            assert!(newsock.conn.is_none());
            assert!(!newsock.is_connected());
            assert!(!newsock.is_monitored());
            assert_eq!(stack.pools().tcp.in_use(), 0);
        }
        assert!(!stack.is_locked());
        assert!(stack.monitors().is_empty());

        // smoltcp 句柄在下一次上锁时回收
        assert_eq!(stack.release_queue().len(), 1);
        let core = stack.lock();
        assert_eq!(stack.release_queue().len(), 0);
        assert!(!core.inet.sockets.iter().any(|(h, _)| h == handle));
    }

    #[test]
    fn test_listen_failure_drops_backlog() {
        let stack = stack();
        let mut server = tcp_socket(&stack);
        server.bind(&SockAddr::inet(LOCALHOST, 7300)).unwrap();
        server.listen(1).unwrap();

        let mut client = tcp_socket(&stack);
        retry_while_blocked(&stack, || client.connect(&SockAddr::inet(LOCALHOST, 7300))).unwrap();
        assert_eq!(client.listen(4), Err(NetError::Backend(errno::EISCONN)));
        assert!(!client.flags().contains(SocketFlags::LISTENING));
        let conn = client.tcp_conn().unwrap().lock();
        assert!(!conn.is_listening());
        assert_eq!(conn.backlog_capacity(), None);
    }

    #[test]
    fn test_accept_errors() {
        let stack = stack();
        let mut dgram = udp_socket(&stack);
        assert_eq!(dgram.accept(None).err(), Some(NetError::OperationNotSupported));

        let mut server = tcp_socket(&stack);
        server.bind(&SockAddr::inet(LOCALHOST, 7100)).unwrap();
        server.listen(1).unwrap();
        assert_eq!(server.accept(Some(4)).err(), Some(NetError::AddressTooShort));
        assert_eq!(server.accept(None).err(), Some(NetError::WouldBlock));

        // 阻塞等待被打断
        server.set_nonblocking(false);
        assert_eq!(server.accept(None).err(), Some(NetError::Interrupted));
        assert!(!stack.is_locked());
    }

    #[test]
    fn test_send_on_unconnected_stream() {
        let stack = stack();
        let mut sock = tcp_socket(&stack);
        assert_eq!(sock.send(b"x", MsgFlags::empty()), Err(NetError::NotConnected));
    }

    #[test]
    fn test_udp_association() {
        let stack = stack();
        let mut sock = udp_socket(&stack);
        assert_eq!(sock.send(b"x", MsgFlags::empty()), Err(NetError::DestinationRequired));

        sock.connect(&SockAddr::inet(LOCALHOST, 5353)).unwrap();
        assert!(sock.flags().contains(SocketFlags::CONNECTED));
        assert_ne!(sock.udp_conn().unwrap().lock().local_port(), 0);
        assert_eq!(sock.send(b"hello", MsgFlags::empty()), Ok(5));
        assert_eq!(
            sock.sendto(b"hello", MsgFlags::empty(), &SockAddr::inet(LOCALHOST, 5354)),
            Err(NetError::AlreadyConnected)
        );

        sock.connect(&SockAddr::unspec()).unwrap();
        assert!(!sock.flags().contains(SocketFlags::CONNECTED));
        assert_eq!(sock.udp_conn().unwrap().lock().remote_endpoint(), None);
    }

    #[test]
    fn test_udp_sendto() {
        let stack = stack();
        let mut sock = udp_socket(&stack);
        let to = SockAddr::inet(LOCALHOST, 6000);
        assert_eq!(sock.sendto(b"abc", MsgFlags::empty(), &to), Ok(3));
        assert_ne!(sock.udp_conn().unwrap().lock().local_port(), 0);

        assert_eq!(
            sock.sendto(b"abc", MsgFlags::empty(), &SockAddr::local(b"/x")),
            Err(NetError::AddressFamilyMismatch)
        );
        let big = alloc::vec![0u8; 8192];
        assert_eq!(
            sock.sendto(&big, MsgFlags::empty(), &to),
            Err(NetError::Backend(errno::EMSGSIZE))
        );
    }

    #[test]
    fn test_inverted_ephemeral_range() {
        let stack = testing::stack_with(crate::NetConfig::default().with_ephemeral_ports(65535, 1));
        let to = SockAddr::inet(LOCALHOST, 9);
        let mut first = udp_socket(&stack);
        let mut second = udp_socket(&stack);
        assert_eq!(first.sendto(b"abc", MsgFlags::empty(), &to), Ok(3));
        assert_eq!(second.sendto(b"abc", MsgFlags::empty(), &to), Ok(3));
        assert_eq!(first.udp_conn().unwrap().lock().local_port(), 1);
        assert_eq!(second.udp_conn().unwrap().lock().local_port(), 2);
    }

    #[test]
    fn test_close_returns_ports() {
        let stack = stack();
        let mut sock = tcp_socket(&stack);
        sock.bind(&SockAddr::inet(LOCALHOST, 7200)).unwrap();
        sock.close();
        assert_eq!(stack.pools().tcp.in_use(), 0);

        let mut again = tcp_socket(&stack);
        again.bind(&SockAddr::inet(LOCALHOST, 7200)).unwrap();
    }
}
