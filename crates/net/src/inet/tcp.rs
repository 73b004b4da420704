//! 流式后端（smoltcp TCP）
//!
//! 监听方为 backlog 的每个槽位保留一个处于 Listen 状态的 smoltcp socket，
//! 入站处理把进入 Established 的 socket 挪进 backlog，再补一个新的监听 socket。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use log::{debug, warn};
use smoltcp::iface::SocketHandle;
use smoltcp::socket::tcp;
use smoltcp::wire::{IpAddress, IpEndpoint, IpListenEndpoint};
use uapi::errno;

use super::iface::{InetCore, Release, ReleaseQueue};
use crate::addr::AddressFamily;
use crate::backlog::Backlog;
use crate::conn::ConnRef;
use crate::error::NetError;
use crate::monitor::start_monitor;
use crate::ops::net_ops;
use crate::socket::{Socket, SocketFlags};
use crate::stack::{NetLockGuard, NetStack};

/// 已建立、等待 accept 的连接
#[derive(Debug)]
pub(crate) struct PendingTcp {
    handle: SocketHandle,
    remote: IpEndpoint,
}

/// TCP 连接对象
#[derive(Debug)]
pub struct TcpConn {
    conn_id: usize,
    domain: AddressFamily,
    handle: SocketHandle,
    lport: u16,
    laddr: Option<IpAddress>,
    remote: Option<IpEndpoint>,
    /// 除 `handle` 之外的监听 socket
    spares: Vec<SocketHandle>,
    backlog: Option<Backlog<PendingTcp>>,
    listening: bool,
    owns_port: bool,
    release: Arc<ReleaseQueue>,
}

impl TcpConn {
    /// smoltcp 句柄
    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// 地址族
    pub fn domain(&self) -> AddressFamily {
        self.domain
    }

    /// 本地端口，未绑定时为 0
    pub fn local_port(&self) -> u16 {
        self.lport
    }

    /// 对端端点
    pub fn remote_endpoint(&self) -> Option<IpEndpoint> {
        self.remote
    }

    /// 是否在监听
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// backlog 容量，尚未创建时为 `None`
    pub fn backlog_capacity(&self) -> Option<usize> {
        self.backlog.as_ref().map(Backlog::capacity)
    }

    /// backlog 中待 accept 的连接数
    pub fn pending(&self) -> usize {
        self.backlog.as_ref().map_or(0, Backlog::len)
    }

    fn listen_endpoint(&self) -> IpListenEndpoint {
        IpListenEndpoint {
            addr: self.laddr,
            port: self.lport,
        }
    }
}

impl Drop for TcpConn {
    fn drop(&mut self) {
        let mut handles = vec![self.handle];
        handles.append(&mut self.spares);
        if let Some(backlog) = self.backlog.as_mut() {
            handles.extend(backlog.drain().map(|p| p.handle));
        }
        let port = (self.owns_port && self.lport != 0).then_some(self.lport);
        self.release.push(Release::Tcp {
            conn_id: self.conn_id,
            handles,
            port,
        });
    }
}

fn new_socket(buffer_size: usize) -> tcp::Socket<'static> {
    let rx_buffer = tcp::SocketBuffer::new(vec![0; buffer_size]);
    let tx_buffer = tcp::SocketBuffer::new(vec![0; buffer_size]);
    tcp::Socket::new(rx_buffer, tx_buffer)
}

fn map_listen_err(err: tcp::ListenError) -> NetError {
    match err {
        tcp::ListenError::InvalidState => NetError::Backend(errno::EISCONN),
        tcp::ListenError::Unaddressable => NetError::Backend(errno::EADDRNOTAVAIL),
    }
}

fn map_connect_err(err: tcp::ConnectError) -> NetError {
    match err {
        tcp::ConnectError::InvalidState => NetError::Backend(errno::EISCONN),
        tcp::ConnectError::Unaddressable => NetError::Backend(errno::ENETUNREACH),
    }
}

/// 分配 TCP 连接对象及其 smoltcp socket
pub(crate) fn tcp_alloc(stack: &NetStack, domain: AddressFamily) -> Result<ConnRef<TcpConn>, NetError> {
    let slot = stack.pools().tcp.reserve()?;
    let mut core = stack.lock();
    let buffer_size = core.inet.tcp_buffer_size;
    let handle = core.inet.sockets.add(new_socket(buffer_size));
    let release = stack.release_queue();
    Ok(ConnRef::build(slot, |conn_id| TcpConn {
        conn_id,
        domain,
        handle,
        lport: 0,
        laddr: None,
        remote: None,
        spares: Vec::new(),
        backlog: None,
        listening: false,
        owns_port: false,
        release,
    }))
}

/// 绑定本地端点；端口 0 分配临时端口
pub(crate) fn tcp_bind(inet: &mut InetCore, conn: &ConnRef<TcpConn>, local: IpEndpoint) -> Result<(), NetError> {
    let mut inner = conn.lock();
    if inner.lport != 0 {
        warn!("net: tcp conn {} already bound to port {}", conn.id(), inner.lport);
        return Err(NetError::Backend(errno::EINVAL));
    }
    let laddr = (!local.addr.is_unspecified()).then_some(local.addr);
    if let Some(addr) = laddr {
        if !inet.has_addr(addr) {
            return Err(NetError::Backend(errno::EADDRNOTAVAIL));
        }
    }
    inner.lport = inet.tcp_ports.bind(local.port)?;
    inner.laddr = laddr;
    inner.owns_port = true;
    debug!("net: tcp conn {} bound to port {}", conn.id(), inner.lport);
    Ok(())
}

/// 按调用者给定的深度创建 backlog；已存在时调整容量
#[cfg(feature = "tcp-backlog")]
pub(crate) fn tcp_backlogcreate(conn: &ConnRef<TcpConn>, depth: usize) -> Result<(), NetError> {
    let mut inner = conn.lock();
    match inner.backlog.as_mut() {
        Some(backlog) => backlog.resize(depth),
        None => {
            inner.backlog = Some(Backlog::create(depth)?);
            Ok(())
        }
    }
}

/// 开始监听
///
/// 从未进入监听状态的连接在失败时不保留 backlog。
pub(crate) fn tcp_listen(inet: &mut InetCore, conn: &ConnRef<TcpConn>) -> Result<(), NetError> {
    let mut inner = conn.lock();
    let result = start_listening(inet, conn, &mut inner);
    if result.is_err() && !inner.listening {
        inner.backlog = None;
    }
    result
}

fn start_listening(inet: &mut InetCore, conn: &ConnRef<TcpConn>, inner: &mut TcpConn) -> Result<(), NetError> {
    if inner.backlog.is_none() {
        inner.backlog = Some(Backlog::create(1)?);
    }
    let endpoint = inner.listen_endpoint();

    if !inner.listening {
        inet.sockets
            .get_mut::<tcp::Socket>(inner.handle)
            .listen(endpoint)
            .map_err(map_listen_err)?;
        inner.listening = true;
        inet.listeners.push(conn.downgrade());
    }

    let slots = inner.backlog_capacity().unwrap_or(1);
    while inner.spares.len() + 1 < slots {
        let mut socket = new_socket(inet.tcp_buffer_size);
        socket.listen(endpoint).map_err(map_listen_err)?;
        let handle = inet.sockets.add(socket);
        inner.spares.push(handle);
    }
    debug!("net: tcp conn {} listening on port {} ({} slot(s))", conn.id(), inner.lport, slots);
    Ok(())
}

/// 入站处理：把已建立的连接挪进各监听方的 backlog
pub(crate) fn collect_established(inet: &mut InetCore) {
    inet.listeners.retain(|l| l.is_alive());
    let listeners: Vec<_> = inet.listeners.iter().filter_map(|l| l.upgrade()).collect();

    for conn in listeners {
        let mut inner = conn.lock();
        if !inner.listening {
            continue;
        }
        let endpoint = inner.listen_endpoint();

        for slot in 0..=inner.spares.len() {
            if inner.backlog.as_ref().is_none_or(Backlog::is_full) {
                break;
            }
            let handle = if slot == 0 { inner.handle } else { inner.spares[slot - 1] };
            let socket = inet.sockets.get::<tcp::Socket>(handle);
            if socket.state() != tcp::State::Established {
                continue;
            }
            let Some(remote) = socket.remote_endpoint() else {
                continue;
            };

            let mut fresh = new_socket(inet.tcp_buffer_size);
            if fresh.listen(endpoint).is_err() {
                continue;
            }
            let fresh = inet.sockets.add(fresh);
            if slot == 0 {
                inner.handle = fresh;
            } else {
                inner.spares[slot - 1] = fresh;
            }

            if let Some(backlog) = inner.backlog.as_mut() {
                if let Err(pending) = backlog.push(PendingTcp { handle, remote }) {
                    inet.sockets.remove(pending.handle);
                    continue;
                }
            }
            debug!("net: tcp conn {} queued connection from {}", conn.id(), remote);
        }
    }
}

/// 从 backlog 取出最早的连接，为它创建新的连接对象
///
/// 调用者持有网络锁；阻塞等待时锁被临时释放。
pub(crate) fn tcp_accept(
    core: &mut NetLockGuard<'_>,
    listener: &ConnRef<TcpConn>,
    nonblock: bool,
) -> Result<(IpEndpoint, ConnRef<TcpConn>), NetError> {
    let stack = core.stack();
    loop {
        core.poll();

        let (pending, domain, lport, laddr) = {
            let mut inner = listener.lock();
            if !inner.listening {
                return Err(NetError::Backend(errno::EINVAL));
            }
            let pending = inner.backlog.as_mut().and_then(Backlog::pop);
            (pending, inner.domain, inner.lport, inner.laddr)
        };

        if let Some(PendingTcp { handle, remote }) = pending {
            let slot = match stack.pools().tcp.reserve() {
                Ok(slot) => slot,
                Err(err) => {
                    core.inet.release(
                        Release::Tcp {
                            conn_id: 0,
                            handles: vec![handle],
                            port: None,
                        },
                        stack.monitors(),
                    );
                    return Err(err);
                }
            };
            let release = stack.release_queue();
            let conn = ConnRef::build(slot, |conn_id| TcpConn {
                conn_id,
                domain,
                handle,
                lport,
                laddr,
                remote: Some(remote),
                spares: Vec::new(),
                backlog: None,
                listening: false,
                owns_port: false,
                release,
            });
            debug!("net: tcp conn {} accepted from {}", conn.id(), remote);
            return Ok((remote, conn));
        }

        if nonblock {
            return Err(NetError::WouldBlock);
        }
        if !core.unlocked(|| net_ops().wait_net_event()) {
            return Err(NetError::Interrupted);
        }
    }
}

/// 发起连接，握手完成后把 socket 标记为已连接并开始监视
///
/// 非阻塞时握手未完成返回 [`NetError::WouldBlock`]，之后再次调用 connect 检查结果。
pub(crate) fn tcp_connect(core: &mut NetLockGuard<'_>, psock: &mut Socket, remote: IpEndpoint) -> Result<(), NetError> {
    let nonblock = psock.is_nonblocking();
    tcp_handshake(core, psock.tcp_conn()?, remote, nonblock)?;

    psock.flags.insert(SocketFlags::CONNECTED);
    if let Err(err) = start_monitor(core, psock) {
        psock.flags.remove(SocketFlags::CONNECTED);
        return Err(err);
    }
    Ok(())
}

fn tcp_handshake(
    core: &mut NetLockGuard<'_>,
    conn: &ConnRef<TcpConn>,
    remote: IpEndpoint,
    nonblock: bool,
) -> Result<(), NetError> {
    {
        let mut inner = conn.lock();
        let inet = &mut core.inet;
        let state = inet.sockets.get::<tcp::Socket>(inner.handle).state();
        match state {
            // 上次非阻塞连接之后被对端复位
            tcp::State::Closed if inner.remote.is_some() => {
                warn!("net: tcp conn {} connection refused", conn.id());
                inner.remote = None;
                return Err(NetError::Backend(errno::ECONNREFUSED));
            }
            tcp::State::Closed => {
                if inner.lport == 0 {
                    inner.lport = inet.tcp_ports.bind_ephemeral()?;
                    inner.owns_port = true;
                }
                let local = inner.listen_endpoint();
                let cx = inet.iface.context();
                inet.sockets
                    .get_mut::<tcp::Socket>(inner.handle)
                    .connect(cx, remote, local)
                    .map_err(map_connect_err)?;
                inner.remote = Some(remote);
                debug!("net: tcp conn {} connecting to {}", conn.id(), remote);
            }
            tcp::State::SynSent | tcp::State::SynReceived | tcp::State::Established => {}
            _ => return Err(NetError::Backend(errno::EISCONN)),
        }
    }

    loop {
        core.poll();
        let state = {
            let inner = conn.lock();
            core.inet.sockets.get::<tcp::Socket>(inner.handle).state()
        };
        match state {
            tcp::State::Established => return Ok(()),
            tcp::State::SynSent | tcp::State::SynReceived => {}
            _ => {
                warn!("net: tcp conn {} connection refused", conn.id());
                conn.lock().remote = None;
                return Err(NetError::Backend(errno::ECONNREFUSED));
            }
        }

        if nonblock {
            return Err(NetError::WouldBlock);
        }
        if !core.unlocked(|| net_ops().wait_net_event()) {
            return Err(NetError::Interrupted);
        }
    }
}

/// 写入发送缓冲区；缓冲区满时按阻塞模式等待
pub(crate) fn tcp_send(
    stack: &NetStack,
    conn: &ConnRef<TcpConn>,
    buf: &[u8],
    nonblock: bool,
) -> Result<usize, NetError> {
    let mut core = stack.lock();
    loop {
        let sent = {
            let inner = conn.lock();
            let socket = core.inet.sockets.get_mut::<tcp::Socket>(inner.handle);
            match socket.state() {
                tcp::State::Established | tcp::State::CloseWait => {
                    socket.send_slice(buf).map_err(|_| NetError::NotConnected)?
                }
                tcp::State::Closed
                | tcp::State::Listen
                | tcp::State::SynSent
                | tcp::State::SynReceived => return Err(NetError::NotConnected),
                _ => return Err(NetError::Backend(errno::EPIPE)),
            }
        };

        if sent > 0 || buf.is_empty() {
            core.poll();
            return Ok(sent);
        }
        if nonblock {
            return Err(NetError::WouldBlock);
        }
        if !core.unlocked(|| net_ops().wait_net_event()) {
            return Err(NetError::Interrupted);
        }
    }
}
