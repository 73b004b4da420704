//! 6LoWPAN 专用编码发送路径
//!
//! 同时存在 6LoWPAN 与其他链路时，发送先尝试专用编码，失败后按 [`FallbackPolicy`]
//! 决定是否退回通用路径。专用编码成功时绝不再走通用路径。
//!
//! [`FallbackPolicy`]: crate::config::FallbackPolicy

use log::debug;
use smoltcp::wire::IpEndpoint;
use uapi::socket::MsgFlags;

use crate::error::NetError;
use crate::stack::NetStack;

/// 6LoWPAN 发送器
pub trait LowpanSender: Send + Sync {
    /// 流式发送
    fn tcp_send(&self, conn_id: usize, remote: Option<IpEndpoint>, buf: &[u8]) -> Result<usize, NetError>;

    /// 发往已关联的对端
    fn udp_send(&self, conn_id: usize, remote: IpEndpoint, buf: &[u8]) -> Result<usize, NetError>;

    /// 发往指定端点
    fn udp_sendto(&self, conn_id: usize, buf: &[u8], flags: MsgFlags, to: IpEndpoint) -> Result<usize, NetError>;
}

/// 先走专用编码，失败且策略允许时再走通用路径
pub(crate) fn send_with_fallback<S, G>(stack: &NetStack, specialized: S, generic: G) -> Result<usize, NetError>
where
    S: FnOnce(&dyn LowpanSender) -> Result<usize, NetError>,
    G: FnOnce() -> Result<usize, NetError>,
{
    #[cfg(feature = "sixlowpan")]
    if let Some(sender) = stack.lowpan() {
        match specialized(sender.as_ref()) {
            Ok(sent) => return Ok(sent),
            Err(err) => {
                let config = stack.config();
                if !config.multinic || !config.fallback.admits(&err) {
                    return Err(err);
                }
                debug!("net: 6LoWPAN send failed ({:?}), trying the generic path", err);
            }
        }
    }
    #[cfg(not(feature = "sixlowpan"))]
    let _ = (stack, specialized);

    generic()
}
