//! 本地 socket 的连接状态、名字空间与字节通道
//!
//! 流式连接建立时创建一条双向通道，客户端与服务端各持一端。
//! 一端的连接对象销毁时关闭自己那一侧，并通知对端的监视项。

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use log::debug;
use sync::SpinLock;
use uapi::errno;

use crate::addr::SockAddr;
use crate::backlog::Backlog;
use crate::conn::{ConnRef, WeakConn};
use crate::error::NetError;
use crate::monitor::MonitorTable;

/// 本地 socket 的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    /// 字节流
    Stream,
    /// 数据报
    Dgram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LocalState {
    Idle,
    Listening,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Server,
}

#[derive(Debug)]
struct LocalChannel {
    to_server: VecDeque<u8>,
    to_client: VecDeque<u8>,
    capacity: usize,
    client_open: bool,
    server_open: bool,
}

impl LocalChannel {
    fn is_open(&self, side: Side) -> bool {
        match side {
            Side::Client => self.client_open,
            Side::Server => self.server_open,
        }
    }

    fn outbound(&mut self, side: Side) -> &mut VecDeque<u8> {
        match side {
            Side::Client => &mut self.to_server,
            Side::Server => &mut self.to_client,
        }
    }

    #[cfg(test)]
    fn inbound(&mut self, side: Side) -> &mut VecDeque<u8> {
        match side {
            Side::Client => &mut self.to_client,
            Side::Server => &mut self.to_server,
        }
    }
}

/// 通道的一端
struct ChannelEnd {
    channel: Arc<SpinLock<LocalChannel>>,
    side: Side,
    peer_id: usize,
}

impl ChannelEnd {
    fn peer_side(&self) -> Side {
        match self.side {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

/// 已连接、等待 accept 的服务端连接
#[derive(Debug)]
pub(crate) struct PendingLocal {
    pub(crate) conn: ConnRef<LocalConn>,
    pub(crate) peer: SockAddr,
}

/// 一个数据报：来源地址与内容
pub(crate) type Datagram = (SockAddr, Vec<u8>);

/// 本地连接对象
pub struct LocalConn {
    conn_id: usize,
    kind: LocalKind,
    name: Option<Vec<u8>>,
    state: LocalState,
    backlog: Option<Backlog<PendingLocal>>,
    channel: Option<ChannelEnd>,
    /// 流式：对端名字；数据报：关联的目标
    peer: Option<SockAddr>,
    inbox: VecDeque<Datagram>,
    inbox_slots: usize,
    buffer_size: usize,
    monitors: Arc<MonitorTable>,
}

impl LocalConn {
    pub(crate) fn new(
        conn_id: usize,
        kind: LocalKind,
        buffer_size: usize,
        inbox_slots: usize,
        monitors: Arc<MonitorTable>,
    ) -> Self {
        Self {
            conn_id,
            kind,
            name: None,
            state: LocalState::Idle,
            backlog: None,
            channel: None,
            peer: None,
            inbox: VecDeque::new(),
            inbox_slots,
            buffer_size,
            monitors,
        }
    }

    /// 种类
    pub fn kind(&self) -> LocalKind {
        self.kind
    }

    /// 绑定的名字
    pub fn name(&self) -> Option<&[u8]> {
        self.name.as_deref()
    }

    /// 本端地址，未命名时只有标签
    pub fn local_addr(&self) -> SockAddr {
        self.name
            .as_deref()
            .map_or_else(SockAddr::unnamed_local, SockAddr::local)
    }

    /// 对端地址（流式）或关联目标（数据报）
    pub fn peer_addr(&self) -> Option<&SockAddr> {
        self.peer.as_ref()
    }

    /// 是否在监听
    pub fn is_listening(&self) -> bool {
        self.state == LocalState::Listening
    }

    /// backlog 中待 accept 的连接数
    pub fn pending(&self) -> usize {
        self.backlog.as_ref().map_or(0, Backlog::len)
    }

    /// 对端是否仍然持有通道
    pub fn peer_alive(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|end| end.channel.lock().is_open(end.peer_side()))
    }

    pub(crate) fn state(&self) -> LocalState {
        self.state
    }

    pub(crate) fn set_name(&mut self, name: &[u8]) {
        self.name = Some(name.to_vec());
    }

    pub(crate) fn set_peer(&mut self, peer: Option<SockAddr>) {
        self.peer = peer;
    }

    /// 开始监听；已在监听时只调整 backlog 容量
    pub(crate) fn listen(&mut self, depth: usize) -> Result<(), NetError> {
        match self.backlog.as_mut() {
            Some(backlog) => backlog.resize(depth)?,
            None => self.backlog = Some(Backlog::create(depth)?),
        }
        self.state = LocalState::Listening;
        Ok(())
    }

    /// 放入一个待 accept 的连接；backlog 满时原样退回
    pub(crate) fn enqueue(&mut self, pending: PendingLocal) -> Result<(), PendingLocal> {
        match self.backlog.as_mut() {
            Some(backlog) if self.state == LocalState::Listening => backlog.push(pending),
            _ => Err(pending),
        }
    }

    pub(crate) fn dequeue(&mut self) -> Option<PendingLocal> {
        self.backlog.as_mut().and_then(Backlog::pop)
    }

    pub(crate) fn can_enqueue(&self) -> bool {
        self.state == LocalState::Listening && self.backlog.as_ref().is_some_and(|b| !b.is_full())
    }

    /// 写入通道，返回写入的字节数；通道满时返回 0
    pub(crate) fn write_stream(&self, buf: &[u8]) -> Result<usize, NetError> {
        let end = self.channel.as_ref().ok_or(NetError::NotConnected)?;
        let mut channel = end.channel.lock();
        if !channel.is_open(end.peer_side()) {
            return Err(NetError::Backend(errno::EPIPE));
        }
        let capacity = channel.capacity;
        let queue = channel.outbound(end.side);
        let n = buf.len().min(capacity.saturating_sub(queue.len()));
        queue.extend(&buf[..n]);
        Ok(n)
    }

    /// 投递一个数据报；收件箱满时原样退回
    pub(crate) fn deliver(&mut self, datagram: Datagram) -> Result<(), Datagram> {
        if self.inbox.len() >= self.inbox_slots {
            return Err(datagram);
        }
        self.inbox.push_back(datagram);
        Ok(())
    }

    /// 单个数据报的上限
    pub(crate) fn max_datagram(&self) -> usize {
        self.buffer_size
    }

    #[cfg(test)]
    pub(crate) fn read_stream(&self) -> Vec<u8> {
        self.channel.as_ref().map_or_else(Vec::new, |end| {
            end.channel.lock().inbound(end.side).drain(..).collect()
        })
    }

    #[cfg(test)]
    pub(crate) fn take_datagram(&mut self) -> Option<Datagram> {
        self.inbox.pop_front()
    }
}

/// 在客户端与服务端之间建立通道，两端都进入已连接状态
pub(crate) fn connect_pair(client: &mut LocalConn, server: &mut LocalConn, capacity: usize) {
    let channel = Arc::new(SpinLock::new(LocalChannel {
        to_server: VecDeque::new(),
        to_client: VecDeque::new(),
        capacity,
        client_open: true,
        server_open: true,
    }));
    client.channel = Some(ChannelEnd {
        channel: channel.clone(),
        side: Side::Client,
        peer_id: server.conn_id,
    });
    server.channel = Some(ChannelEnd {
        channel,
        side: Side::Server,
        peer_id: client.conn_id,
    });
    client.state = LocalState::Connected;
    server.state = LocalState::Connected;
}

impl fmt::Debug for LocalConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalConn")
            .field("conn_id", &self.conn_id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for LocalConn {
    fn drop(&mut self) {
        if let Some(end) = self.channel.take() {
            {
                let mut channel = end.channel.lock();
                match end.side {
                    Side::Client => channel.client_open = false,
                    Side::Server => channel.server_open = false,
                }
            }
            self.monitors.signal(end.peer_id);
        }
        self.monitors.purge(self.conn_id);
        debug!("net: local conn {} closed", self.conn_id);
    }
}

/// 本地 socket 名字空间，位于网络锁之内
#[derive(Default)]
pub struct LocalNamespace {
    names: BTreeMap<Vec<u8>, WeakConn<LocalConn>>,
}

impl LocalNamespace {
    /// 空名字空间
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记名字；名字仍被存活的连接占用时返回 `EADDRINUSE`
    pub(crate) fn bind(&mut self, name: &[u8], conn: &ConnRef<LocalConn>) -> Result<(), NetError> {
        self.names.retain(|_, weak| weak.is_alive());
        if self.names.contains_key(name) {
            return Err(NetError::Backend(errno::EADDRINUSE));
        }
        self.names.insert(name.to_vec(), conn.downgrade());
        Ok(())
    }

    /// 按名字查找
    pub(crate) fn lookup(&self, name: &[u8]) -> Option<ConnRef<LocalConn>> {
        self.names.get(name).and_then(WeakConn::upgrade)
    }

    /// 已登记的名字数（含已失效的）
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
