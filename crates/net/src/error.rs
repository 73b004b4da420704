//! 网络错误类型
//!
//! 分派层与各后端共用同一个错误枚举，可通过 [`NetError::to_errno()`] 转换为系统调用错误码。

use uapi::errno;

/// 网络错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    // 参数校验
    /// 地址族与分派器不符 (-EAFNOSUPPORT)
    AddressFamilyMismatch,
    /// 地址长度小于该地址族的最小长度 (-EFAULT)
    AddressTooShort,
    /// socket 类型与协议号的组合不受支持 (-EPROTONOSUPPORT)
    ProtocolNotSupported,
    /// 当前 socket 类型不支持该操作 (-EOPNOTSUPP)
    OperationNotSupported,

    // 连接状态
    /// 已经连接 (-EISCONN)
    AlreadyConnected,
    /// 尚未连接 (-ENOTCONN)
    NotConnected,
    /// 未指定目的地址 (-EDESTADDRREQ)
    DestinationRequired,

    // 资源与调度
    /// 连接对象或队列分配失败 (-ENOMEM)
    ResourceExhausted,
    /// 非阻塞操作将阻塞 (-EAGAIN)
    WouldBlock,
    /// 阻塞等待被信号打断 (-EINTR)
    Interrupted,

    /// 传输后端返回的原始错误码（正数）
    Backend(i32),
}

impl NetError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        let errno = match self {
            NetError::AddressFamilyMismatch => errno::EAFNOSUPPORT,
            NetError::AddressTooShort => errno::EFAULT,
            NetError::ProtocolNotSupported => errno::EPROTONOSUPPORT,
            NetError::OperationNotSupported => errno::EOPNOTSUPP,
            NetError::AlreadyConnected => errno::EISCONN,
            NetError::NotConnected => errno::ENOTCONN,
            NetError::DestinationRequired => errno::EDESTADDRREQ,
            NetError::ResourceExhausted => errno::ENOMEM,
            NetError::WouldBlock => errno::EAGAIN,
            NetError::Interrupted => errno::EINTR,
            NetError::Backend(errno) => *errno,
        };
        -(errno as isize)
    }

    /// 资源不足或不支持一类的错误
    pub fn is_unsupported_class(&self) -> bool {
        matches!(
            self,
            NetError::ResourceExhausted
                | NetError::OperationNotSupported
                | NetError::ProtocolNotSupported
                | NetError::Backend(errno::ENOMEM | errno::ENOBUFS | errno::EOPNOTSUPP | errno::ENOSYS)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_errno_is_negative() {
        assert_eq!(NetError::AddressTooShort.to_errno(), -14);
        assert_eq!(NetError::AddressFamilyMismatch.to_errno(), -97);
        assert_eq!(NetError::AlreadyConnected.to_errno(), -106);
        assert_eq!(NetError::WouldBlock.to_errno(), -11);
        assert_eq!(NetError::Backend(errno::EADDRINUSE).to_errno(), -98);
    }

    #[test]
    fn test_unsupported_class() {
        assert!(NetError::ResourceExhausted.is_unsupported_class());
        assert!(NetError::Backend(errno::ENOBUFS).is_unsupported_class());
        assert!(!NetError::Backend(errno::EIO).is_unsupported_class());
        assert!(!NetError::WouldBlock.is_unsupported_class());
    }
}
