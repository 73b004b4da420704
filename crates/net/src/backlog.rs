//! 待 accept 的连接队列
//!
//! 有界 FIFO，由监听方的连接对象持有。入站处理在队尾追加，accept 从队头取出。

use alloc::collections::VecDeque;

use crate::error::NetError;

/// 有界的待处理连接队列
#[derive(Debug)]
pub struct Backlog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> Backlog<T> {
    /// 创建容量为 `capacity` 的队列；0 按 1 处理
    ///
    /// 存储一次性预留，内存不足时返回 [`NetError::ResourceExhausted`]。
    pub fn create(capacity: usize) -> Result<Self, NetError> {
        let capacity = capacity.max(1);
        let mut entries = VecDeque::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|_| NetError::ResourceExhausted)?;
        Ok(Self { entries, capacity })
    }

    /// 调整容量，已在队列中的条目保留
    pub fn resize(&mut self, capacity: usize) -> Result<(), NetError> {
        let capacity = capacity.max(1);
        if capacity > self.entries.capacity() {
            self.entries
                .try_reserve_exact(capacity - self.entries.len())
                .map_err(|_| NetError::ResourceExhausted)?;
        }
        self.capacity = capacity;
        Ok(())
    }

    /// 追加到队尾；队列已满时原样退回
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.entries.push_back(item);
        Ok(())
    }

    /// 取出最早到达的条目
    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    /// 队列中的条目数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 队列是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 队列是否已满
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// 队列容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 清空队列，返回所有条目
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_and_bound() {
        let mut backlog = Backlog::create(2).unwrap();
        assert!(backlog.push(1).is_ok());
        assert!(backlog.push(2).is_ok());
        assert_eq!(backlog.push(3), Err(3));
        assert_eq!(backlog.pop(), Some(1));
        assert!(backlog.push(3).is_ok());
        assert_eq!(backlog.pop(), Some(2));
        assert_eq!(backlog.pop(), Some(3));
        assert!(backlog.is_empty());
    }

    #[test]
    fn test_zero_capacity_means_one() {
        let mut backlog = Backlog::create(0).unwrap();
        assert_eq!(backlog.capacity(), 1);
        assert!(backlog.push('a').is_ok());
        assert!(backlog.is_full());
    }

    #[test]
    fn test_resize_keeps_entries() {
        let mut backlog = Backlog::create(1).unwrap();
        backlog.push(10).unwrap();
        backlog.resize(3).unwrap();
        backlog.push(11).unwrap();
        assert_eq!(backlog.len(), 2);
        backlog.resize(1).unwrap();
        assert!(backlog.is_full());
        assert_eq!(backlog.drain().count(), 2);
    }
}
