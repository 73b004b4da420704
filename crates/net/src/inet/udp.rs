//! 数据报后端（smoltcp UDP）

use alloc::sync::Arc;
use alloc::vec;

use log::debug;
use smoltcp::iface::SocketHandle;
use smoltcp::socket::udp;
use smoltcp::wire::{IpAddress, IpEndpoint, IpListenEndpoint};
use uapi::errno;

use super::iface::{InetCore, Release, ReleaseQueue};
use crate::addr::AddressFamily;
use crate::conn::ConnRef;
use crate::error::NetError;
use crate::ops::net_ops;
use crate::stack::NetStack;

/// UDP 连接对象
#[derive(Debug)]
pub struct UdpConn {
    conn_id: usize,
    domain: AddressFamily,
    handle: SocketHandle,
    lport: u16,
    laddr: Option<IpAddress>,
    remote: Option<IpEndpoint>,
    owns_port: bool,
    release: Arc<ReleaseQueue>,
}

impl UdpConn {
    /// 地址族
    pub fn domain(&self) -> AddressFamily {
        self.domain
    }

    /// 本地端口，未绑定时为 0
    pub fn local_port(&self) -> u16 {
        self.lport
    }

    /// 关联的对端
    pub fn remote_endpoint(&self) -> Option<IpEndpoint> {
        self.remote
    }
}

impl Drop for UdpConn {
    fn drop(&mut self) {
        let port = (self.owns_port && self.lport != 0).then_some(self.lport);
        self.release.push(Release::Udp {
            conn_id: self.conn_id,
            handle: self.handle,
            port,
        });
    }
}

fn new_socket(slots: usize, buffer_size: usize) -> udp::Socket<'static> {
    let rx_buffer = udp::PacketBuffer::new(vec![udp::PacketMetadata::EMPTY; slots], vec![0; buffer_size]);
    let tx_buffer = udp::PacketBuffer::new(vec![udp::PacketMetadata::EMPTY; slots], vec![0; buffer_size]);
    udp::Socket::new(rx_buffer, tx_buffer)
}

fn map_bind_err(err: udp::BindError) -> NetError {
    match err {
        udp::BindError::InvalidState => NetError::Backend(errno::EINVAL),
        udp::BindError::Unaddressable => NetError::Backend(errno::EADDRNOTAVAIL),
    }
}

/// 分配 UDP 连接对象及其 smoltcp socket
pub(crate) fn udp_alloc(stack: &NetStack, domain: AddressFamily) -> Result<ConnRef<UdpConn>, NetError> {
    let slot = stack.pools().udp.reserve()?;
    let mut core = stack.lock();
    let socket = new_socket(core.inet.udp_packet_slots, core.inet.udp_buffer_size);
    let handle = core.inet.sockets.add(socket);
    let release = stack.release_queue();
    Ok(ConnRef::build(slot, |conn_id| UdpConn {
        conn_id,
        domain,
        handle,
        lport: 0,
        laddr: None,
        remote: None,
        owns_port: false,
        release,
    }))
}

fn bind_port(inet: &mut InetCore, conn: &mut UdpConn, laddr: Option<IpAddress>, port: u16) -> Result<(), NetError> {
    let port = inet.udp_ports.bind(port)?;
    let endpoint = IpListenEndpoint { addr: laddr, port };
    if let Err(err) = inet.sockets.get_mut::<udp::Socket>(conn.handle).bind(endpoint) {
        inet.udp_ports.unbind(port);
        return Err(map_bind_err(err));
    }
    conn.lport = port;
    conn.laddr = laddr;
    conn.owns_port = true;
    Ok(())
}

/// 绑定本地端点；端口 0 分配临时端口
pub(crate) fn udp_bind(inet: &mut InetCore, conn: &ConnRef<UdpConn>, local: IpEndpoint) -> Result<(), NetError> {
    let mut inner = conn.lock();
    if inner.lport != 0 {
        return Err(NetError::Backend(errno::EINVAL));
    }
    let laddr = (!local.addr.is_unspecified()).then_some(local.addr);
    if let Some(addr) = laddr {
        if !inet.has_addr(addr) {
            return Err(NetError::Backend(errno::EADDRNOTAVAIL));
        }
    }
    bind_port(inet, &mut inner, laddr, local.port)?;
    debug!("net: udp conn {} bound to port {}", conn.id(), inner.lport);
    Ok(())
}

/// 建立（`Some`）或解除（`None`）关联
pub(crate) fn udp_connect(
    inet: &mut InetCore,
    conn: &ConnRef<UdpConn>,
    remote: Option<IpEndpoint>,
) -> Result<(), NetError> {
    let mut inner = conn.lock();
    match remote {
        Some(remote) => {
            if inner.lport == 0 {
                bind_port(inet, &mut inner, None, 0)?;
            }
            inner.remote = Some(remote);
            debug!("net: udp conn {} associated with {}", conn.id(), remote);
        }
        None => {
            inner.remote = None;
            debug!("net: udp conn {} association dissolved", conn.id());
        }
    }
    Ok(())
}

/// 发送到关联的对端
pub(crate) fn udp_send(
    stack: &NetStack,
    conn: &ConnRef<UdpConn>,
    buf: &[u8],
    nonblock: bool,
) -> Result<usize, NetError> {
    let remote = conn.lock().remote.ok_or(NetError::DestinationRequired)?;
    udp_sendto(stack, conn, buf, remote, nonblock)
}

/// 发送到指定端点；未绑定时先分配临时端口
pub(crate) fn udp_sendto(
    stack: &NetStack,
    conn: &ConnRef<UdpConn>,
    buf: &[u8],
    to: IpEndpoint,
    nonblock: bool,
) -> Result<usize, NetError> {
    let mut core = stack.lock();
    if buf.len() > core.inet.udp_buffer_size {
        return Err(NetError::Backend(errno::EMSGSIZE));
    }
    {
        let mut inner = conn.lock();
        if inner.lport == 0 {
            bind_port(&mut core.inet, &mut inner, None, 0)?;
        }
    }

    loop {
        let result = {
            let inner = conn.lock();
            core.inet
                .sockets
                .get_mut::<udp::Socket>(inner.handle)
                .send_slice(buf, to)
        };
        match result {
            Ok(()) => {
                core.poll();
                return Ok(buf.len());
            }
            Err(udp::SendError::BufferFull) => {}
            Err(udp::SendError::Unaddressable) => return Err(NetError::Backend(errno::EINVAL)),
        }

        if nonblock {
            return Err(NetError::WouldBlock);
        }
        if !core.unlocked(|| net_ops().wait_net_event()) {
            return Err(NetError::Interrupted);
        }
    }
}
