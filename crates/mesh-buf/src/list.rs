use alloc::{collections::VecDeque, sync::Arc, vec::Vec};
use core::fmt;

use spin::Mutex;

use crate::{
    buf::{NET_BUF_FRAGS, NetBuf},
    lock::{CriticalSectionLock, IrqGuard, IrqLock},
};

/// `NetBufList` 是受中断锁保护的缓冲 FIFO（`net_buf_slist_put`/`net_buf_slist_get`）。
///
/// # 设计初衷（Why）
/// - 发送队列需要把整条分片链作为一个单元排队，而链接字段又不能与队列节点复用；
/// - 入队时把链展平为连续条目并用 [`NET_BUF_FRAGS`] 标记“后面还有同链分片”，出队时据此重组。
///
/// # 契约说明（What）
/// - `put` 接收链头的所有权，链上每个非尾成员都会被置位 `NET_BUF_FRAGS`；
/// - `get` 返回重组后的链头，标志在重组时清除；
/// - 队列操作在临界区内完成，链的拆分与重组在临界区之外进行；
/// - 临界区内只读取槽位上的原子标志，从不获取槽位锁，因此其它上下文持有某个排队缓冲的
///   [`NetBufGuard`](crate::NetBufGuard) 时进入临界区也不会与 `get` 互相等待。
pub struct NetBufList {
    lock: Arc<dyn IrqLock>,
    queue: Mutex<VecDeque<NetBuf>>,
}

impl NetBufList {
    pub fn new() -> Self {
        Self::with_lock(Arc::new(CriticalSectionLock))
    }

    pub fn with_lock(lock: Arc<dyn IrqLock>) -> Self {
        Self {
            lock,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// 把 `buf` 及其整条分片链放入队尾。
    pub fn put(&self, buf: NetBuf) {
        let mut members = Vec::new();
        let mut cur = Some(buf);
        while let Some(member) = cur {
            cur = member.state().frags.take();
            if cur.is_some() {
                member.slot().set_flags(NET_BUF_FRAGS);
            }
            members.push(member);
        }

        let _irq = IrqGuard::enter(self.lock.as_ref());
        self.queue.lock().extend(members);
    }

    /// 取出队首的链并重新连接分片；队列为空时返回 `None`。
    pub fn get(&self) -> Option<NetBuf> {
        let members = {
            let _irq = IrqGuard::enter(self.lock.as_ref());
            let mut queue = self.queue.lock();
            let head = queue.pop_front()?;
            let mut more = head.flags() & NET_BUF_FRAGS != 0;
            let mut members = alloc::vec![head];
            while more {
                let Some(member) = queue.pop_front() else {
                    break;
                };
                more = member.flags() & NET_BUF_FRAGS != 0;
                members.push(member);
            }
            members
        };

        let mut tail: Option<NetBuf> = None;
        for member in members.into_iter().rev() {
            member.slot().clear_flags(NET_BUF_FRAGS);
            member.state().frags = tail.take();
            tail = Some(member);
        }
        tail
    }

    /// 队列中的缓冲条目数（分片各计一条）。
    pub fn len(&self) -> usize {
        let _irq = IrqGuard::enter(self.lock.as_ref());
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NetBufList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NetBufList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBufList")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetBufPool, Timeout};

    #[test]
    fn put_flattens_and_get_reassembles() {
        let pool = NetBufPool::new("list-unit", 3, 4, 0, None);
        let head = pool.alloc(Timeout::NoWait).expect("分配");
        head.add_mem(b"h");
        let tail = pool.alloc(Timeout::NoWait).expect("分配");
        tail.add_mem(b"t");
        let head = NetBuf::frag_add(Some(head), tail);
        let single = pool.alloc(Timeout::NoWait).expect("分配");

        let list = NetBufList::new();
        list.put(head);
        list.put(single);
        assert_eq!(list.len(), 3);

        let chain = list.get().expect("链");
        assert_eq!(chain.flags(), 0);
        assert_eq!(chain.frags_len(), 2);
        assert_eq!(list.len(), 1);
        let alone = list.get().expect("单缓冲");
        assert!(alone.frags().is_none());
        assert!(list.get().is_none());
    }
}
