//! socket 地址
//!
//! [`SockAddr`] 是调用者传入或取回的地址记录：开头两个字节是地址族标签，
//! 其后的布局与 C 的 `sockaddr_in` / `sockaddr_in6` / `sockaddr_un` 相同。
//! 记录长度可变，分派器按地址族的最小长度做校验。

use alloc::vec::Vec;

use log::error;
use smoltcp::wire::{IpAddress, IpEndpoint, Ipv4Address, Ipv6Address};
use uapi::socket::{
    SaFamily, AF_INET, AF_INET6, AF_LOCAL, AF_UNSPEC, SA_FAMILY_LEN, SOCKADDR_IN6_LEN,
    SOCKADDR_IN_LEN, UNIX_PATH_MAX,
};

use crate::error::NetError;

/// 地址族
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// 未指定（数据报 connect 时用于解除关联）
    Unspec,
    /// 本地（Unix 域）
    Local,
    /// IPv4
    Inet,
    /// IPv6
    Inet6,
}

impl AddressFamily {
    /// 从 `AF_*` 取值解析
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            AF_UNSPEC => Some(AddressFamily::Unspec),
            AF_LOCAL => Some(AddressFamily::Local),
            AF_INET => Some(AddressFamily::Inet),
            AF_INET6 => Some(AddressFamily::Inet6),
            _ => None,
        }
    }

    /// 对应的 `AF_*` 取值
    pub fn as_raw(&self) -> i32 {
        match self {
            AddressFamily::Unspec => AF_UNSPEC,
            AddressFamily::Local => AF_LOCAL,
            AddressFamily::Inet => AF_INET,
            AddressFamily::Inet6 => AF_INET6,
        }
    }

    /// 该地址族地址结构的最小长度
    pub fn min_addr_len(&self) -> usize {
        match self {
            AddressFamily::Inet => SOCKADDR_IN_LEN,
            AddressFamily::Inet6 => SOCKADDR_IN6_LEN,
            AddressFamily::Local | AddressFamily::Unspec => SA_FAMILY_LEN,
        }
    }
}

/// 带地址族标签的地址记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SockAddr {
    raw: Vec<u8>,
}

impl SockAddr {
    /// 按原样包装调用者提供的字节
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self { raw: bytes.to_vec() }
    }

    /// 只有 `AF_UNSPEC` 标签的地址
    pub fn unspec() -> Self {
        Self::with_family(AF_UNSPEC)
    }

    /// 未命名的本地地址（只有标签）
    pub fn unnamed_local() -> Self {
        Self::with_family(AF_LOCAL)
    }

    /// 本地地址：标签 + 路径 + 结尾 NUL
    pub fn local(path: &[u8]) -> Self {
        let mut addr = Self::with_family(AF_LOCAL);
        addr.raw.extend_from_slice(path);
        addr.raw.push(0);
        addr
    }

    /// `sockaddr_in`
    pub fn inet(octets: [u8; 4], port: u16) -> Self {
        let mut addr = Self::with_family(AF_INET);
        addr.raw.extend_from_slice(&port.to_be_bytes());
        addr.raw.extend_from_slice(&octets);
        addr.raw.resize(SOCKADDR_IN_LEN, 0);
        addr
    }

    /// `sockaddr_in6`，flowinfo 与 scope_id 置零
    pub fn inet6(octets: [u8; 16], port: u16) -> Self {
        let mut addr = Self::with_family(AF_INET6);
        addr.raw.extend_from_slice(&port.to_be_bytes());
        addr.raw.extend_from_slice(&[0; 4]);
        addr.raw.extend_from_slice(&octets);
        addr.raw.resize(SOCKADDR_IN6_LEN, 0);
        addr
    }

    /// 从 smoltcp 端点构造
    pub fn from_endpoint(endpoint: IpEndpoint) -> Self {
        match endpoint.addr {
            IpAddress::Ipv4(v4) => Self::inet(v4.octets(), endpoint.port),
            IpAddress::Ipv6(v6) => Self::inet6(v6.octets(), endpoint.port),
        }
    }

    fn with_family(family: i32) -> Self {
        let mut raw = Vec::with_capacity(SOCKADDR_IN_LEN);
        raw.extend_from_slice(&(family as SaFamily).to_ne_bytes());
        Self { raw }
    }

    /// 截断到 `len` 字节
    pub fn truncated(&self, len: usize) -> Self {
        Self { raw: self.raw[..len.min(self.raw.len())].to_vec() }
    }

    /// 原始字节
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// 记录长度
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// 记录是否为空
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// 读取地址族标签；记录连标签都放不下时返回 [`NetError::AddressTooShort`]
    pub fn family(&self) -> Result<i32, NetError> {
        match self.raw.get(..SA_FAMILY_LEN) {
            Some(tag) => Ok(SaFamily::from_ne_bytes([tag[0], tag[1]]) as i32),
            None => Err(NetError::AddressTooShort),
        }
    }

    /// 解析为 smoltcp 端点；调用前应已通过 [`check_inet`]
    pub fn to_endpoint(&self) -> Result<IpEndpoint, NetError> {
        let family = self.family()?;
        let min = match family {
            AF_INET => SOCKADDR_IN_LEN,
            AF_INET6 => SOCKADDR_IN6_LEN,
            _ => return Err(NetError::AddressFamilyMismatch),
        };
        if self.raw.len() < min {
            return Err(NetError::AddressTooShort);
        }
        let port = u16::from_be_bytes([self.raw[2], self.raw[3]]);
        let addr = if family == AF_INET {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&self.raw[4..8]);
            IpAddress::Ipv4(Ipv4Address::from(octets))
        } else {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&self.raw[8..24]);
            IpAddress::Ipv6(Ipv6Address::from(octets))
        };
        Ok(IpEndpoint::new(addr, port))
    }

    /// 本地地址中的路径（不含结尾 NUL）
    pub fn local_path(&self) -> &[u8] {
        let path = self.raw.get(SA_FAMILY_LEN..).unwrap_or(&[]);
        let end = path.iter().position(|&b| b == 0).unwrap_or(path.len());
        &path[..end]
    }
}

/// 校验 inet 地址：先看标签，再看长度
pub(crate) fn check_inet(addr: &SockAddr) -> Result<AddressFamily, NetError> {
    let family = addr.family().inspect_err(|_| {
        error!("net: address record of {} bytes has no family tag", addr.len());
    })?;
    let family = match family {
        AF_INET => AddressFamily::Inet,
        AF_INET6 => AddressFamily::Inet6,
        _ => {
            error!("net: unexpected address family {}", family);
            return Err(NetError::AddressFamilyMismatch);
        }
    };
    if addr.len() < family.min_addr_len() {
        error!("net: invalid address length {} < {}", addr.len(), family.min_addr_len());
        return Err(NetError::AddressTooShort);
    }
    Ok(family)
}

/// 校验本地地址：长度至少放得下标签，标签必须是 `AF_LOCAL`
pub(crate) fn check_local(addr: &SockAddr) -> Result<(), NetError> {
    let family = addr.family().inspect_err(|_| {
        error!("net: local address record of {} bytes has no family tag", addr.len());
    })?;
    if family != AF_LOCAL {
        error!("net: unexpected address family {}", family);
        return Err(NetError::AddressFamilyMismatch);
    }
    if addr.local_path().len() >= UNIX_PATH_MAX {
        return Err(NetError::Backend(uapi::errno::ENAMETOOLONG));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inet_record_layout() {
        let addr = SockAddr::inet([127, 0, 0, 1], 8080);
        assert_eq!(addr.len(), 16);
        assert_eq!(addr.family(), Ok(AF_INET));
        assert_eq!(&addr.as_bytes()[2..4], &8080u16.to_be_bytes());
        let ep = addr.to_endpoint().unwrap();
        assert_eq!(ep.port, 8080);
        assert_eq!(ep.addr, IpAddress::v4(127, 0, 0, 1));
    }

    #[test]
    fn test_inet6_from_endpoint() {
        let mut octets = [0u8; 16];
        octets[15] = 1;
        let ep = IpEndpoint::new(IpAddress::Ipv6(Ipv6Address::from(octets)), 443);
        let addr = SockAddr::from_endpoint(ep);
        assert_eq!(addr.len(), 28);
        assert_eq!(check_inet(&addr), Ok(AddressFamily::Inet6));
        assert_eq!(addr.to_endpoint(), Ok(ep));
    }

    #[test]
    fn test_check_inet_rejects_short_and_foreign() {
        let short = SockAddr::inet([10, 0, 0, 1], 1).truncated(3);
        assert_eq!(check_inet(&short), Err(NetError::AddressTooShort));
        assert_eq!(check_inet(&SockAddr::from_bytes(&[2])), Err(NetError::AddressTooShort));
        assert_eq!(check_inet(&SockAddr::local(b"/tmp/x")), Err(NetError::AddressFamilyMismatch));
        // 标签是 IPv6，长度只够 IPv4
        let v6_short = SockAddr::inet6([0; 16], 1).truncated(16);
        assert_eq!(check_inet(&v6_short), Err(NetError::AddressTooShort));
    }

    #[test]
    fn test_local_path() {
        let addr = SockAddr::local(b"/run/ctl");
        assert_eq!(addr.local_path(), b"/run/ctl");
        assert_eq!(check_local(&addr), Ok(()));
        assert!(SockAddr::unnamed_local().local_path().is_empty());
        assert_eq!(check_local(&SockAddr::inet([0; 4], 0)), Err(NetError::AddressFamilyMismatch));
        assert_eq!(check_local(&SockAddr::from_bytes(&[1])), Err(NetError::AddressTooShort));
    }
}
