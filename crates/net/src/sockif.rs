//! socket 接口表
//!
//! 每个地址族一张表，列出全部七个可分派的操作。socket 创建时按地址族选定，
//! 此后不再改变。地址族不支持的操作也必须给出实现，返回“不支持”错误。

use uapi::socket::MsgFlags;

use crate::addr::{AddressFamily, SockAddr};
use crate::error::NetError;
use crate::socket::Socket;

/// 地址族分派器
pub trait SockIf: Sync {
    /// 校验类型与协议，分配连接对象并挂到 socket 上
    fn setup(&self, psock: &mut Socket, protocol: i32) -> Result<(), NetError>;

    /// 绑定本地地址
    fn bind(&self, psock: &mut Socket, addr: &SockAddr) -> Result<(), NetError>;

    /// 开始接受连接请求
    fn listen(&self, psock: &mut Socket, backlog: usize) -> Result<(), NetError>;

    /// 连接对端；数据报 socket 上是建立或解除关联
    fn connect(&self, psock: &mut Socket, addr: &SockAddr) -> Result<(), NetError>;

    /// 取出最早的待处理连接，填充 `newsock`
    ///
    /// `addr_capacity` 是调用者地址缓冲区的容量，`None` 表示不需要对端地址。
    fn accept(
        &self,
        psock: &mut Socket,
        addr_capacity: Option<usize>,
        newsock: &mut Socket,
    ) -> Result<Option<SockAddr>, NetError>;

    /// 在已连接/已关联的 socket 上发送
    fn send(&self, psock: &mut Socket, buf: &[u8], flags: MsgFlags) -> Result<usize, NetError>;

    /// 发送到指定地址
    fn sendto(
        &self,
        psock: &mut Socket,
        buf: &[u8],
        flags: MsgFlags,
        to: &SockAddr,
    ) -> Result<usize, NetError>;
}

/// 按地址族选择分派器
pub fn sockif_for(family: AddressFamily) -> Option<&'static dyn SockIf> {
    match family {
        AddressFamily::Inet | AddressFamily::Inet6 => Some(&crate::inet::INET_SOCKIF),
        #[cfg(feature = "local")]
        AddressFamily::Local => Some(&crate::local::LOCAL_SOCKIF),
        _ => None,
    }
}
