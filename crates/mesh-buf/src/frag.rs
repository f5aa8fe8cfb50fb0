//! 分片链操作。
//!
//! 每个缓冲至多持有一个指向下一分片的链接，链接本身就是一次计数引用：
//! 父缓冲释放到零时，链接随之交还并沿链继续释放。
//! 链上的操作只在单个槽位锁内读写链接，不会同时持有两个槽位锁。

use alloc::vec::Vec;
use core::panic::Location;

use tracing::trace;

use crate::{buf::NetBuf, pool::Timeout};

impl NetBuf {
    /// 下一分片的新引用（`buf->frags`）。
    pub fn frags(&self) -> Option<NetBuf> {
        self.state().frags.as_ref().map(NetBuf::add_ref)
    }

    /// 从自身开始遍历整条链，每一项都是新的引用。
    pub fn chain(&self) -> Chain {
        Chain {
            next: Some(self.add_ref()),
        }
    }

    /// 链尾缓冲的新引用（`net_buf_frag_last`）。
    pub fn frag_last(&self) -> NetBuf {
        let mut cur = self.add_ref();
        while let Some(next) = cur.frags() {
            cur = next;
        }
        cur
    }

    /// 在自身之后插入 `frag`（`net_buf_frag_insert`）。
    ///
    /// `frag` 连同它已有的链整体插入：原来跟在自身后面的分片接到 `frag` 链的末尾，
    /// 自身的链接改为 `frag`。调用方的 `frag` 引用转交给链。
    ///
    /// # Panics
    /// 自身的链与 `frag` 的链有公共成员时 panic，链必须保持无环。覆盖三种情形：
    /// 自身位于 `frag` 的链中、`frag` 已挂在自身之后（直接或更深处）、
    /// 原后继分片位于 `frag` 的链中。检查在修改任何链接之前完成。
    #[track_caller]
    pub fn frag_insert(&self, frag: NetBuf) {
        let own: Vec<NetBuf> = self.chain().collect();
        if let Some(shared) = frag
            .chain()
            .find(|member| own.iter().any(|mine| mine.same_buf(member)))
        {
            panic!(
                "frag_insert 会使分片链成环：槽位 {} 同时位于槽位 {} 的链与待插入的链中",
                shared.id(),
                self.id()
            );
        }
        trace!(
            pool = %self.pool().name(),
            parent = self.id(),
            frag = frag.id(),
            caller = %Location::caller(),
            "net_buf frag insert"
        );
        let previous = self.state().frags.take();
        if let Some(previous) = previous {
            let last = frag.frag_last();
            let mut state = last.state();
            debug_assert!(state.frags.is_none());
            state.frags = Some(previous);
        }
        self.state().frags = Some(frag);
    }

    /// 把 `frag` 追加到 `head` 所在链的末尾并返回链头（`net_buf_frag_add`）。
    ///
    /// `head` 为空时 `frag` 自身成为链头。
    #[track_caller]
    pub fn frag_add(head: Option<NetBuf>, frag: NetBuf) -> NetBuf {
        match head {
            None => frag,
            Some(head) => {
                head.frag_last().frag_insert(frag);
                head
            }
        }
    }

    /// 从链中摘除 `frag` 并返回其后继（`net_buf_frag_del`）。
    ///
    /// - 给出 `parent` 时，`parent` 的链接必须恰好指向 `frag`；链接改为 `frag` 的后继，
    ///   链对 `frag` 的引用与调用方传入的引用一并释放，返回值是后继的一份新引用；
    /// - 未给出 `parent` 时，`frag` 视为链头：链接被摘下并直接交给调用方，调用方的引用被释放。
    ///
    /// # Panics
    /// `parent` 的链接不是 `frag` 时 panic。
    #[track_caller]
    pub fn frag_del(parent: Option<&NetBuf>, frag: NetBuf) -> Option<NetBuf> {
        trace!(
            pool = %frag.pool().name(),
            parent = parent.map(NetBuf::id),
            frag = frag.id(),
            caller = %Location::caller(),
            "net_buf frag del"
        );
        let Some(parent) = parent else {
            let next = frag.state().frags.take();
            drop(frag);
            return next;
        };

        let linked = {
            let mut state = parent.state();
            assert!(
                state
                    .frags
                    .as_ref()
                    .is_some_and(|linked| linked.same_buf(&frag)),
                "frag_del：父缓冲 {} 的链接不是分片 {}",
                parent.id(),
                frag.id()
            );
            state.frags.take()
        };
        let next = frag.state().frags.take();
        let following = next.as_ref().map(NetBuf::add_ref);
        parent.state().frags = next;
        drop(linked);
        drop(frag);
        following
    }

    /// 整条链的有效数据总长（`net_buf_frags_len`）。
    pub fn frags_len(&self) -> usize {
        self.chain().map(|member| member.len()).sum()
    }

    /// 从链的第 `offset` 字节开始拷贝至多 `len` 字节到 `dst`，返回实际拷贝数（`net_buf_linearize`）。
    ///
    /// 拷贝量同时受 `dst.len()` 与链上剩余数据限制，可能少于 `len`。
    pub fn linearize(&self, dst: &mut [u8], offset: usize, len: usize) -> usize {
        let mut remaining = len.min(dst.len());
        let mut offset = offset;
        let mut copied = 0;
        for member in self.chain() {
            if remaining == 0 {
                break;
            }
            let state = member.state();
            let data = state.simple.data();
            if offset >= data.len() {
                offset -= data.len();
                continue;
            }
            let count = remaining.min(data.len() - offset);
            dst[copied..copied + count].copy_from_slice(&data[offset..offset + count]);
            copied += count;
            remaining -= count;
            offset = 0;
        }
        copied
    }

    /// 向链尾追加 `data`，尾部空间不足时通过 `allocate` 申请新分片（`net_buf_append_bytes`）。
    ///
    /// 返回实际追加的字节数；`allocate` 返回 `None` 时提前停止。
    pub fn append_bytes<F>(&self, data: &[u8], timeout: Timeout, mut allocate: F) -> usize
    where
        F: FnMut(Timeout) -> Option<NetBuf>,
    {
        let mut tail = self.frag_last();
        let mut added = 0;
        loop {
            let count = {
                let mut state = tail.state();
                let count = state.simple.tailroom().min(data.len() - added);
                state.simple.add_mem(&data[added..added + count]);
                count
            };
            added += count;
            if added == data.len() {
                return added;
            }
            let Some(frag) = allocate(timeout) else {
                return added;
            };
            let next = frag.add_ref();
            tail.frag_insert(frag);
            tail = next;
        }
    }

    /// 从链头开始跳过 `len` 字节，丢弃被完全消费的分片，返回新的链头（`net_buf_skip`）。
    pub fn skip(buf: NetBuf, len: usize) -> Option<NetBuf> {
        let mut remaining = len;
        let mut cur = Some(buf);
        while remaining > 0 {
            let Some(head) = cur.take() else {
                break;
            };
            let consumed = {
                let mut state = head.state();
                let count = remaining.min(state.simple.len());
                state.simple.pull(count);
                count
            };
            remaining -= consumed;
            cur = if head.is_empty() {
                NetBuf::frag_del(None, head)
            } else {
                Some(head)
            };
        }
        cur
    }
}

/// 分片链迭代器，见 [`NetBuf::chain`]。
#[derive(Debug)]
pub struct Chain {
    next: Option<NetBuf>,
}

impl Iterator for Chain {
    type Item = NetBuf;

    fn next(&mut self) -> Option<NetBuf> {
        let current = self.next.take()?;
        self.next = current.frags();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NetBufPool;

    fn filled(pool: &NetBufPool, payload: &[u8]) -> NetBuf {
        let buf = pool.alloc(Timeout::NoWait).expect("分配");
        buf.add_mem(payload);
        buf
    }

    #[test]
    fn insert_splices_existing_tail_after_new_frag() {
        let pool = NetBufPool::new("frag-unit", 3, 8, 0, None);
        let head = filled(&pool, b"a");
        head.frag_insert(filled(&pool, b"c"));
        head.frag_insert(filled(&pool, b"b"));
        let order: alloc::vec::Vec<_> = head.chain().flat_map(|member| member.to_vec()).collect();
        assert_eq!(order, b"abc");
    }

    #[test]
    fn dropping_head_releases_whole_chain() {
        let pool = NetBufPool::new("frag-unit", 3, 8, 0, None);
        let head = filled(&pool, b"1");
        let head = NetBuf::frag_add(Some(head), filled(&pool, b"2"));
        let head = NetBuf::frag_add(Some(head), filled(&pool, b"3"));
        assert_eq!(pool.uninit_count(), 0);
        drop(head);
        assert_eq!(pool.uninit_count(), 3);
    }

    #[test]
    #[should_panic(expected = "成环")]
    fn insert_rejects_cycles() {
        let pool = NetBufPool::new("frag-unit", 2, 8, 0, None);
        let a = filled(&pool, b"a");
        let b = filled(&pool, b"b");
        a.frag_insert(b.clone());
        b.frag_insert(a.clone());
    }

    #[test]
    #[should_panic(expected = "成环")]
    fn insert_rejects_fragment_already_linked() {
        let pool = NetBufPool::new("frag-unit", 2, 8, 0, None);
        let a = filled(&pool, b"a");
        let b = filled(&pool, b"b");
        a.frag_insert(b.clone());
        a.frag_insert(b.clone());
    }
}
