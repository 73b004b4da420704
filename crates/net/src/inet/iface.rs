//! inet 协议栈核心：回环接口、smoltcp socket 集合与端口表
//!
//! 整个结构位于网络锁之内。连接对象析构时不能拿网络锁，
//! 它们把需要回收的 smoltcp 句柄与端口放进 [`ReleaseQueue`]，下次上锁时统一回收。

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, trace};
use smoltcp::iface::{Config, Interface, SocketHandle, SocketSet};
use smoltcp::phy::{Loopback, Medium};
#[cfg(feature = "tcp")]
use smoltcp::socket::tcp;
use smoltcp::time::Instant;
use smoltcp::wire::{EthernetAddress, HardwareAddress, IpAddress};
use sync::SpinLock;

use super::port::PortTable;
use crate::config::NetConfig;
use crate::monitor::MonitorTable;
use crate::ops::net_ops;
#[cfg(feature = "tcp")]
use crate::{conn::WeakConn, inet::tcp::TcpConn};

/// 待回收的后端资源
#[derive(Debug)]
pub(crate) enum Release {
    #[cfg(feature = "tcp")]
    Tcp {
        conn_id: usize,
        handles: Vec<SocketHandle>,
        port: Option<u16>,
    },
    #[cfg(feature = "udp")]
    Udp {
        conn_id: usize,
        handle: SocketHandle,
        port: Option<u16>,
    },
}

/// 延迟回收队列
#[derive(Debug, Default)]
pub(crate) struct ReleaseQueue {
    items: SpinLock<Vec<Release>>,
}

impl ReleaseQueue {
    pub(crate) fn push(&self, item: Release) {
        self.items.lock().push(item);
    }

    pub(crate) fn take(&self) -> Vec<Release> {
        core::mem::take(&mut *self.items.lock())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }
}

pub(crate) fn now() -> Instant {
    Instant::from_millis(net_ops().get_time_ms() as i64)
}

pub(crate) struct InetCore {
    pub(crate) iface: Interface,
    device: Loopback,
    pub(crate) sockets: SocketSet<'static>,
    pub(crate) tcp_ports: PortTable,
    pub(crate) udp_ports: PortTable,
    /// 正在监听的 TCP 连接
    #[cfg(feature = "tcp")]
    pub(crate) listeners: Vec<WeakConn<TcpConn>>,
    /// 已经 close、等待 FIN 交换结束的 TCP 句柄
    #[cfg(feature = "tcp")]
    closing: Vec<SocketHandle>,
    pub(crate) tcp_buffer_size: usize,
    pub(crate) udp_buffer_size: usize,
    pub(crate) udp_packet_slots: usize,
}

impl InetCore {
    pub(crate) fn new(config: &NetConfig) -> Self {
        let mut device = Loopback::new(Medium::Ethernet);
        let hw_addr = HardwareAddress::Ethernet(EthernetAddress([0x02, 0, 0, 0, 0, 0x01]));
        let mut iface = Interface::new(Config::new(hw_addr), &mut device, now());
        iface.update_ip_addrs(|addrs| {
            let _ = addrs.push(config.loopback);
        });
        debug!("net: loopback interface up at {}", config.loopback);

        Self {
            iface,
            device,
            sockets: SocketSet::new(vec![]),
            tcp_ports: PortTable::new("tcp", config.ephemeral_ports),
            udp_ports: PortTable::new("udp", config.ephemeral_ports),
            #[cfg(feature = "tcp")]
            listeners: Vec::new(),
            #[cfg(feature = "tcp")]
            closing: Vec::new(),
            tcp_buffer_size: config.tcp_buffer_size,
            udp_buffer_size: config.udp_buffer_size,
            udp_packet_slots: config.udp_packet_slots,
        }
    }

    /// 地址是否属于本机接口
    pub(crate) fn has_addr(&self, addr: IpAddress) -> bool {
        self.iface.has_ip_addr(addr)
    }

    /// 驱动接口收发，然后处理入站连接与连接丢失
    pub(crate) fn poll(&mut self, monitors: &MonitorTable) {
        let _ = self.iface.poll(now(), &mut self.device, &mut self.sockets);

        #[cfg(feature = "tcp")]
        {
            super::tcp::collect_established(self);
            self.detect_lost(monitors);
            self.reap_closed();
        }
        #[cfg(not(feature = "tcp"))]
        let _ = monitors;
    }

    #[cfg(feature = "tcp")]
    pub(crate) fn tcp_is_active(&self, handle: SocketHandle) -> bool {
        self.sockets.get::<tcp::Socket>(handle).is_active()
    }

    #[cfg(feature = "tcp")]
    fn detect_lost(&self, monitors: &MonitorTable) {
        for (conn_id, handle) in monitors.tcp_targets() {
            if !self.tcp_is_active(handle) {
                monitors.signal(conn_id);
            }
        }
    }

    #[cfg(feature = "tcp")]
    fn reap_closed(&mut self) {
        let sockets = &mut self.sockets;
        self.closing.retain(|&handle| {
            if sockets.get::<tcp::Socket>(handle).is_open() {
                return true;
            }
            sockets.remove(handle);
            trace!("net: tcp socket {:?} removed", handle);
            false
        });
    }

    /// 回收一个连接对象留下的资源
    pub(crate) fn release(&mut self, item: Release, monitors: &MonitorTable) {
        match item {
            #[cfg(feature = "tcp")]
            Release::Tcp {
                conn_id,
                handles,
                port,
            } => {
                monitors.purge(conn_id);
                for handle in handles {
                    let socket = self.sockets.get_mut::<tcp::Socket>(handle);
                    socket.close();
                    self.closing.push(handle);
                }
                if let Some(port) = port {
                    self.tcp_ports.unbind(port);
                }
                self.listeners.retain(|l| l.is_alive());
                self.reap_closed();
            }
            #[cfg(feature = "udp")]
            Release::Udp {
                conn_id,
                handle,
                port,
            } => {
                monitors.purge(conn_id);
                self.sockets.remove(handle);
                if let Some(port) = port {
                    self.udp_ports.unbind(port);
                }
            }
        }
    }
}
