//! 内核网络协议栈：socket 接口分派层
//!
//! 本 crate 位于通用 socket 调用（创建、bind、listen、connect、accept、send、sendto）
//! 与各地址族、各协议的传输后端之间：
//!
//! - [`SockIf`]：每个地址族一张的接口表，socket 创建时选定，之后不再变化
//! - [`inet`]：IPv4/IPv6 分派器，后端为基于 smoltcp 的 TCP/UDP
//! - [`local`]：本地（Unix 域）分派器，后端为内存中的字节通道与数据报队列
//! - [`usrsock`]：外部 socket 提供者，优先于本地协议栈接管 socket
//! - [`NetStack`]：协议栈上下文，持有全局网络锁与连接对象池
//!
//! 连接对象由 [`ConnRef`] 持有，引用计数归零时释放后端资源。
//!
//! # 运行时依赖
//!
//! 使用前必须调用 [`register_net_ops`] 注册时钟与任务唤醒/阻塞实现，
//! 并按 `sync` crate 的要求注册 `ArchOps`。

#![no_std]

extern crate alloc;

pub mod addr;
pub mod backlog;
pub mod config;
pub mod conn;
pub mod error;
pub mod inet;
#[cfg(feature = "local")]
pub mod local;
pub mod monitor;
pub mod ops;
pub mod sixlowpan;
pub mod sockif;
pub mod socket;
pub mod stack;
#[cfg(feature = "usrsock")]
pub mod usrsock;

#[cfg(test)]
mod testing;

pub use ops::{net_ops, register_net_ops, NetOps};

pub use addr::{AddressFamily, SockAddr};
pub use config::{FallbackPolicy, NetConfig};
pub use conn::{ConnPool, ConnRef, Connection, WeakConn};
pub use error::NetError;
pub use sockif::{sockif_for, SockIf};
pub use socket::{Socket, SocketFlags, SocketType};
pub use stack::{NetLockGuard, NetStack, NET_STACK};

// Re-export smoltcp 类型供 syscall 层使用
pub use smoltcp::wire::{IpAddress, IpEndpoint, Ipv4Address, Ipv6Address};
pub use uapi::socket::MsgFlags;
