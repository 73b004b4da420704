//! socket 相关定义
//!
//! 地址族、socket 类型、协议号、`sockaddr_*` 布局以及 `send` 系列的消息标志。

use core::mem::size_of;

use bitflags::bitflags;

/// `sa_family_t`
pub type SaFamily = u16;

// 地址族（AF_*）与协议族（PF_*）取值相同
pub const AF_UNSPEC: i32 = 0;
pub const AF_UNIX: i32 = 1;
pub const AF_LOCAL: i32 = AF_UNIX;
pub const AF_INET: i32 = 2;
pub const AF_INET6: i32 = 10;

pub const PF_UNSPEC: i32 = AF_UNSPEC;
pub const PF_LOCAL: i32 = AF_LOCAL;
pub const PF_INET: i32 = AF_INET;
pub const PF_INET6: i32 = AF_INET6;

// socket 类型
pub const SOCK_STREAM: i32 = 1;
pub const SOCK_DGRAM: i32 = 2;
pub const SOCK_RAW: i32 = 3;
pub const SOCK_SEQPACKET: i32 = 5;
/// 由外部 usrsock 守护进程接管的 socket
pub const SOCK_USRSOCK_TYPE: i32 = 0x7f;

// 与类型一起传入的创建标志
pub const SOCK_NONBLOCK: i32 = 0o4000;
pub const SOCK_CLOEXEC: i32 = 0o2000000;

// IP 协议号
pub const IPPROTO_IP: i32 = 0;
pub const IPPROTO_TCP: i32 = 6;
pub const IPPROTO_UDP: i32 = 17;

/// `struct sockaddr_in`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SockAddrIn {
    pub sin_family: SaFamily,
    /// 网络字节序
    pub sin_port: u16,
    pub sin_addr: [u8; 4],
    pub sin_zero: [u8; 8],
}

/// `struct sockaddr_in6`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SockAddrIn6 {
    pub sin6_family: SaFamily,
    /// 网络字节序
    pub sin6_port: u16,
    pub sin6_flowinfo: u32,
    pub sin6_addr: [u8; 16],
    pub sin6_scope_id: u32,
}

/// `sun_path` 的长度
pub const UNIX_PATH_MAX: usize = 108;

/// `struct sockaddr_un`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SockAddrUn {
    pub sun_family: SaFamily,
    pub sun_path: [u8; UNIX_PATH_MAX],
}

pub const SA_FAMILY_LEN: usize = size_of::<SaFamily>();
pub const SOCKADDR_IN_LEN: usize = size_of::<SockAddrIn>();
pub const SOCKADDR_IN6_LEN: usize = size_of::<SockAddrIn6>();
pub const SOCKADDR_UN_LEN: usize = size_of::<SockAddrUn>();

bitflags! {
    /// `send`/`sendto` 的 flags 参数
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MsgFlags: u32 {
        const MSG_OOB = 0x1;
        const MSG_PEEK = 0x2;
        const MSG_DONTROUTE = 0x4;
        const MSG_DONTWAIT = 0x40;
        const MSG_EOR = 0x80;
        const MSG_NOSIGNAL = 0x4000;
    }
}
