//! 外部 socket 提供者（usrsock）
//!
//! 配置为优先使用外部提供者时，inet 分派器在 setup 阶段先把请求交给提供者：
//!
//! - [`UsrsockSetup::Claimed`]：提供者接管，socket 类型变为 [`SocketType::Usrsock`]，
//!   之后的 bind/send/sendto 都转发给提供者
//! - [`UsrsockSetup::NotRunning`]：守护进程没有运行，退回本地协议栈
//! - [`UsrsockSetup::Failed`]：其他失败，原样返回，不退回
//!
//! 提供者接管的 socket 只持有一个句柄（提供者侧的 socket 编号），没有本地传输状态。

use alloc::sync::Arc;
use core::fmt;

use log::{debug, error, warn};
use uapi::socket::MsgFlags;

use crate::addr::{AddressFamily, SockAddr};
use crate::conn::{ConnRef, Connection};
use crate::error::NetError;
use crate::socket::{Socket, SocketType};

/// 提供者对 setup 请求的答复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsrsockSetup {
    /// 已接管，携带提供者侧的 socket 编号
    Claimed(u32),
    /// 守护进程没有运行
    NotRunning,
    /// 其他失败
    Failed(NetError),
}

/// 外部 socket 提供者
pub trait UsrsockProvider: Send + Sync {
    /// 尝试接管一个新 socket
    fn try_setup(&self, domain: AddressFamily, ty: SocketType, protocol: i32) -> UsrsockSetup;

    /// 绑定
    fn bind(&self, usockid: u32, addr: &SockAddr) -> Result<(), NetError>;

    /// 发送；`to` 为 `None` 时发往已连接的对端
    fn sendto(&self, usockid: u32, buf: &[u8], flags: MsgFlags, to: Option<&SockAddr>) -> Result<usize, NetError>;

    /// 关闭提供者侧的 socket
    fn close(&self, usockid: u32);
}

/// 提供者接管的 socket 句柄
pub struct UsrsockConn {
    usockid: u32,
    provider: Arc<dyn UsrsockProvider>,
}

impl UsrsockConn {
    /// 提供者侧的 socket 编号
    pub fn usockid(&self) -> u32 {
        self.usockid
    }
}

impl Drop for UsrsockConn {
    fn drop(&mut self) {
        self.provider.close(self.usockid);
    }
}

impl fmt::Debug for UsrsockConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsrsockConn").field("usockid", &self.usockid).finish()
    }
}

/// 把 setup 请求交给外部提供者；返回 `true` 表示已被接管
pub(crate) fn usrsock_socket_setup(psock: &mut Socket, protocol: i32) -> Result<bool, NetError> {
    let preferred = {
        let config = psock.stack.config();
        match psock.ty {
            SocketType::Stream => config.usrsock_tcp,
            SocketType::Dgram => config.usrsock_udp,
            _ => true,
        }
    };
    if !preferred {
        return Ok(false);
    }
    let Some(provider) = psock.stack.usrsock() else {
        return Ok(false);
    };

    match provider.try_setup(psock.domain, psock.ty, protocol) {
        UsrsockSetup::Claimed(usockid) => {
            let slot = match psock.stack.pools().usrsock.reserve() {
                Ok(slot) => slot,
                Err(err) => {
                    provider.close(usockid);
                    return Err(err);
                }
            };
            debug!("net: usrsock claimed {:?}/{:?} as {}", psock.domain, psock.ty, usockid);
            psock.ty = SocketType::Usrsock;
            psock.conn = Some(Connection::Usrsock(ConnRef::new(slot, UsrsockConn { usockid, provider })));
            Ok(true)
        }
        UsrsockSetup::NotRunning => {
            warn!("net: usrsock daemon not running, using the local stack");
            Ok(false)
        }
        UsrsockSetup::Failed(err) => {
            error!("net: usrsock setup failed: {:?}", err);
            Err(err)
        }
    }
}

fn provider_of(conn: &ConnRef<UsrsockConn>) -> (u32, Arc<dyn UsrsockProvider>) {
    let inner = conn.lock();
    (inner.usockid, inner.provider.clone())
}

/// 转发 bind
pub(crate) fn usrsock_bind(conn: &ConnRef<UsrsockConn>, addr: &SockAddr) -> Result<(), NetError> {
    let (usockid, provider) = provider_of(conn);
    provider.bind(usockid, addr)
}

/// 转发 send/sendto
pub(crate) fn usrsock_sendto(
    conn: &ConnRef<UsrsockConn>,
    buf: &[u8],
    flags: MsgFlags,
    to: Option<&SockAddr>,
) -> Result<usize, NetError> {
    let (usockid, provider) = provider_of(conn);
    provider.sendto(usockid, buf, flags, to)
}
