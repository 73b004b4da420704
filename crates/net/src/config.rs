//! 协议栈运行时配置
//!
//! 编译期开关见 Cargo features，这里只放运行时可调的参数。

use smoltcp::wire::{IpAddress, IpCidr};

use crate::error::NetError;

/// 专用编码发送失败后是否退回通用路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// 任何错误都退回
    #[default]
    AnyError,
    /// 只在资源不足或不支持时退回
    UnsupportedOnly,
}

impl FallbackPolicy {
    /// 该策略是否允许在 `err` 之后退回通用路径
    pub fn admits(&self, err: &NetError) -> bool {
        match self {
            FallbackPolicy::AnyError => true,
            FallbackPolicy::UnsupportedOnly => err.is_unsupported_class(),
        }
    }
}

/// 网络配置
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// TCP 连接对象池容量
    pub tcp_conns: usize,
    /// UDP 连接对象池容量
    pub udp_conns: usize,
    /// 本地 socket 连接对象池容量
    pub local_conns: usize,
    /// usrsock 句柄池容量
    pub usrsock_conns: usize,
    /// listen 的 backlog 上限
    pub max_backlog: usize,
    /// 流式 socket 优先交给外部提供者
    pub usrsock_tcp: bool,
    /// 数据报 socket 优先交给外部提供者
    pub usrsock_udp: bool,
    /// 存在多种链路编码，专用编码失败后可以退回通用路径
    pub multinic: bool,
    /// 退回策略
    pub fallback: FallbackPolicy,
    /// 每个 TCP socket 的收发缓冲区大小
    pub tcp_buffer_size: usize,
    /// 每个 UDP socket 的收发缓冲区大小
    pub udp_buffer_size: usize,
    /// 每个 UDP socket 的报文元数据槽位数
    pub udp_packet_slots: usize,
    /// 本地流式通道每个方向的容量
    pub local_buffer_size: usize,
    /// 本地数据报接收队列的报文数
    pub local_dgram_slots: usize,
    /// 回环接口地址
    pub loopback: IpCidr,
    /// 临时端口范围（闭区间）
    pub ephemeral_ports: (u16, u16),
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            tcp_conns: 16,
            udp_conns: 16,
            local_conns: 16,
            usrsock_conns: 16,
            max_backlog: 8,
            usrsock_tcp: true,
            usrsock_udp: true,
            multinic: true,
            fallback: FallbackPolicy::AnyError,
            tcp_buffer_size: 4096,
            udp_buffer_size: 4096,
            udp_packet_slots: 16,
            local_buffer_size: 4096,
            local_dgram_slots: 16,
            loopback: IpCidr::new(IpAddress::v4(127, 0, 0, 1), 8),
            ephemeral_ports: (49152, 65535),
        }
    }
}

impl NetConfig {
    /// 设置各连接对象池的容量
    pub fn with_pool_sizes(mut self, tcp: usize, udp: usize, local: usize) -> Self {
        self.tcp_conns = tcp;
        self.udp_conns = udp;
        self.local_conns = local;
        self
    }

    /// 设置 backlog 上限
    pub fn with_max_backlog(mut self, max_backlog: usize) -> Self {
        self.max_backlog = max_backlog;
        self
    }

    /// 设置哪些 socket 类型优先交给外部提供者
    pub fn with_usrsock(mut self, tcp: bool, udp: bool) -> Self {
        self.usrsock_tcp = tcp;
        self.usrsock_udp = udp;
        self
    }

    /// 设置专用编码的退回行为
    pub fn with_fallback(mut self, multinic: bool, fallback: FallbackPolicy) -> Self {
        self.multinic = multinic;
        self.fallback = fallback;
        self
    }

    /// 设置临时端口范围，首尾颠倒时自动交换
    pub fn with_ephemeral_ports(mut self, first: u16, last: u16) -> Self {
        self.ephemeral_ports = (first.min(last), first.max(last));
        self
    }
}
