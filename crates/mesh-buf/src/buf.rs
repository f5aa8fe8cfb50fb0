use alloc::vec::Vec;
use core::{
    fmt,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    panic::Location,
    ptr,
};

use spin::MutexGuard;
use tracing::{error, trace};

use crate::{
    pool::{NetBufPool, REF_MASK, Slot, SlotState, Timeout},
    simple::NetBufSimple,
};

/// 标志位：该缓冲在 [`NetBufList`](crate::NetBufList) 中后面紧跟着属于同一条链的分片。
pub const NET_BUF_FRAGS: u8 = 1 << 0;

/// `NetBuf` 是池化缓冲的计数句柄（`struct net_buf *`）。
///
/// # 设计初衷（Why）
/// - 源系统依靠调用方手工配对 `ref`/`unref`；这里让每个句柄持有恰好一次引用，
///   `Drop` 即 `unref`，从类型层面消除遗忘释放；
/// - 仍需跨越 FFI 或中断边界手工管理时，可通过 [`into_raw`](Self::into_raw) 与
///   [`from_raw`](Self::from_raw) 显式转交所有权。
///
/// # 契约说明（What）
/// - `Clone` 等价于 [`add_ref`](Self::add_ref)；计数为 8 位，达到 255 后饱和并记录错误；
/// - 最后一个句柄释放时先摘下分片链接、派发销毁钩子，再沿链继续释放，释放过程是迭代的；
/// - 游标与用户数据通过 [`lock`](Self::lock) 获得的守卫访问；
///   持有守卫期间不得对同一缓冲调用分片操作，否则会在槽位自旋锁上自锁。
pub struct NetBuf {
    pool: NetBufPool,
    index: u16,
}

impl NetBuf {
    pub(crate) fn from_slot(pool: NetBufPool, index: u16) -> Self {
        Self { pool, index }
    }

    /// 槽位在池内的索引（`net_buf_id`）。
    pub fn id(&self) -> usize {
        usize::from(self.index)
    }

    /// 所属池。
    pub fn pool(&self) -> &NetBufPool {
        &self.pool
    }

    /// 当前引用计数。
    pub fn ref_count(&self) -> usize {
        self.pool.slot(self.index).ref_count() as usize
    }

    /// 是否与 `other` 指向同一个槽位。
    pub fn same_buf(&self, other: &NetBuf) -> bool {
        self.index == other.index && self.pool.ptr_eq(&other.pool)
    }

    /// 增加一次引用并返回新的句柄（`net_buf_ref`）。
    ///
    /// 计数已达 255 时不再递增，记录错误并返回指向同一槽位的句柄；
    /// 此后多出的句柄释放时会被当作重复释放报告。
    #[track_caller]
    pub fn add_ref(&self) -> NetBuf {
        match self.pool.slot(self.index).add_ref() {
            Ok(count) => {
                trace!(
                    pool = %self.pool.name(),
                    id = self.index,
                    refs = count,
                    caller = %Location::caller(),
                    "net_buf ref"
                );
            }
            Err(count) if count == REF_MASK => {
                error!(
                    pool = %self.pool.name(),
                    id = self.index,
                    "net_buf refcount saturated at 255"
                );
                debug_assert!(false, "net_buf 引用计数溢出：槽位 {}", self.index);
            }
            Err(_) => {
                // 句柄存在即意味着计数非零；走到这里说明 from_raw 被滥用。
                error!(
                    pool = %self.pool.name(),
                    id = self.index,
                    "net_buf ref on a slot that is already free"
                );
                debug_assert!(false, "net_buf 对已释放槽位 {} 增加引用", self.index);
            }
        }
        Self {
            pool: self.pool.clone(),
            index: self.index,
        }
    }

    /// 显式释放本句柄持有的引用（`net_buf_unref`），并记录调用位置。
    #[track_caller]
    pub fn unref(self) {
        trace!(
            pool = %self.pool.name(),
            id = self.index,
            caller = %Location::caller(),
            "net_buf unref requested"
        );
        drop(self);
    }

    /// 放弃自动释放，换取一个不计数的原始句柄。
    ///
    /// 原始句柄被丢弃而未交还给 [`from_raw`](Self::from_raw) 时，该引用永久泄漏，槽位不会回到池中。
    pub fn into_raw(self) -> RawNetBuf {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` 不会再被析构，`pool` 在此被按位读取恰好一次，所有权转入返回值。
        let pool = unsafe { ptr::read(&this.pool) };
        RawNetBuf {
            pool,
            index: this.index,
        }
    }

    /// 把原始句柄重新包装为计数句柄，接管它代表的那一次引用。
    ///
    /// 对同一次引用调用两次会造成重复释放；释放路径会检测并报告该情况。
    pub fn from_raw(raw: RawNetBuf) -> NetBuf {
        Self {
            pool: raw.pool,
            index: raw.index,
        }
    }

    /// 锁定槽位，访问游标与用户数据。
    pub fn lock(&self) -> NetBufGuard<'_> {
        NetBufGuard {
            slot: self.slot(),
            state: self.state(),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SlotState> {
        self.pool.state(self.index)
    }

    pub(crate) fn slot(&self) -> &Slot {
        self.pool.slot(self.index)
    }

    /// 标志字节，目前只使用 [`NET_BUF_FRAGS`]。
    ///
    /// 标志与引用计数一样是槽位上的原子字段，读取时不获取槽位锁。
    pub fn flags(&self) -> u8 {
        self.slot().flags()
    }

    /// 有效数据长度。
    pub fn len(&self) -> usize {
        self.state().simple.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn headroom(&self) -> usize {
        self.state().simple.headroom()
    }

    pub fn tailroom(&self) -> usize {
        self.state().simple.tailroom()
    }

    /// 在空缓冲上预留头部空间（`net_buf_reserve`）。
    pub fn reserve(&self, reserve: usize) {
        self.state().simple.reserve(reserve);
    }

    /// 追加数据并返回新写入的长度。
    pub fn add_mem(&self, mem: &[u8]) -> usize {
        self.state().simple.add_mem(mem);
        mem.len()
    }

    /// 复制有效数据。
    pub fn to_vec(&self) -> Vec<u8> {
        self.state().simple.data().to_vec()
    }

    /// 复位游标（`net_buf_reset`）。
    ///
    /// # Panics
    /// 缓冲仍带有标志或分片链接时 panic：复位不负责拆链。
    pub fn reset(&self) {
        assert_eq!(self.flags(), 0, "net_buf_reset 要求标志已清零");
        let mut state = self.state();
        assert!(state.frags.is_none(), "net_buf_reset 要求缓冲没有分片");
        state.simple.reset();
    }

    /// 从同一个池分配新缓冲并复制头部预留与有效数据（`net_buf_clone`）。
    ///
    /// 用户数据与分片不会被复制。池耗尽时返回 `None`。
    #[track_caller]
    pub fn deep_clone(&self, timeout: Timeout) -> Option<NetBuf> {
        let clone = self.pool.alloc(timeout)?;
        let (headroom, payload) = {
            let state = self.state();
            (state.simple.headroom(), state.simple.data().to_vec())
        };
        {
            let mut dst = clone.state();
            dst.simple.reserve(headroom);
            dst.simple.add_mem(&payload);
        }
        Some(clone)
    }
}

impl Clone for NetBuf {
    #[track_caller]
    fn clone(&self) -> Self {
        self.add_ref()
    }
}

impl Drop for NetBuf {
    fn drop(&mut self) {
        // 沿分片链迭代释放，避免长链在递归析构中耗尽栈空间。
        let mut next = self.pool.release_one(self.index);
        while let Some(buf) = next {
            let raw = buf.into_raw();
            next = raw.pool.release_one(raw.index);
        }
    }
}

impl fmt::Debug for NetBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBuf")
            .field("pool", &self.pool.name())
            .field("id", &self.index)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// 不参与计数的缓冲句柄，由 [`NetBuf::into_raw`] 产生。
///
/// 与裸指针一样可以复制；复制品并不代表额外的引用，每一份引用只能交还给 `from_raw` 一次。
#[derive(Clone)]
pub struct RawNetBuf {
    pool: NetBufPool,
    index: u16,
}

impl RawNetBuf {
    pub fn id(&self) -> usize {
        usize::from(self.index)
    }

    pub fn pool(&self) -> &NetBufPool {
        &self.pool
    }
}

impl fmt::Debug for RawNetBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawNetBuf")
            .field("pool", &self.pool.name())
            .field("id", &self.index)
            .finish()
    }
}

/// 槽位锁守卫，解引用为 [`NetBufSimple`] 游标。
pub struct NetBufGuard<'a> {
    slot: &'a Slot,
    state: MutexGuard<'a, SlotState>,
}

impl NetBufGuard<'_> {
    /// 用户元数据区（`net_buf_user_data`）。
    pub fn user_data(&self) -> &[u8] {
        &self.state.user_data
    }

    pub fn user_data_mut(&mut self) -> &mut [u8] {
        &mut self.state.user_data
    }

    pub fn flags(&self) -> u8 {
        self.slot.flags()
    }
}

impl Deref for NetBufGuard<'_> {
    type Target = NetBufSimple;

    fn deref(&self) -> &NetBufSimple {
        &self.state.simple
    }
}

impl DerefMut for NetBufGuard<'_> {
    fn deref_mut(&mut self) -> &mut NetBufSimple {
        &mut self.state.simple
    }
}

/// `DestroyHook` 在缓冲引用计数归零后接管槽位的归还（`destroy` 回调）。
///
/// # 契约说明（What）
/// - 钩子收到 [`ReleasedBuf`] 时，分片链接已被摘下，槽位尚未回到池中；
/// - 调用 [`ReleasedBuf::finish`] 或丢弃它都会完成归还，钩子也可以把它转移到别处延后完成；
/// - 钩子执行时池内部不持有任何锁，可以安全地再次分配。
pub trait DestroyHook: Send + Sync + 'static {
    fn destroy(&self, released: ReleasedBuf);
}

impl<F> DestroyHook for F
where
    F: Fn(ReleasedBuf) + Send + Sync + 'static,
{
    fn destroy(&self, released: ReleasedBuf) {
        self(released)
    }
}

/// 计数归零、等待归还的槽位。析构时完成归还（`net_buf_destroy`）。
pub struct ReleasedBuf {
    pool: NetBufPool,
    index: u16,
}

impl ReleasedBuf {
    pub(crate) fn new(pool: NetBufPool, index: u16) -> Self {
        Self { pool, index }
    }

    pub fn id(&self) -> usize {
        usize::from(self.index)
    }

    pub fn pool(&self) -> &NetBufPool {
        &self.pool
    }

    /// 读取归还前的用户元数据。
    pub fn with_user_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.pool.state(self.index).user_data)
    }

    /// 读取归还前的有效数据。
    pub fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.pool.state(self.index).simple.data())
    }

    /// 立即把槽位归还给池。
    pub fn finish(self) {
        drop(self);
    }
}

impl Drop for ReleasedBuf {
    fn drop(&mut self) {
        self.pool.finish_destroy(self.index);
        trace!(pool = %self.pool.name(), id = self.index, "net_buf slot returned to pool");
    }
}

impl fmt::Debug for ReleasedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleasedBuf")
            .field("pool", &self.pool.name())
            .field("id", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(count: u16) -> NetBufPool {
        NetBufPool::new("buf-unit", count, 16, 4, None)
    }

    #[test]
    fn clone_shares_slot_and_counts() {
        let pool = pool(2);
        let buf = pool.alloc(Timeout::NoWait).expect("分配");
        let other = buf.clone();
        assert!(buf.same_buf(&other));
        assert_eq!(buf.ref_count(), 2);
        drop(other);
        assert_eq!(buf.ref_count(), 1);
        assert_eq!(pool.uninit_count(), 1);
        drop(buf);
        assert_eq!(pool.uninit_count(), 2);
    }

    #[test]
    fn raw_round_trip_keeps_reference() {
        let pool = pool(1);
        let buf = pool.alloc(Timeout::NoWait).expect("分配");
        let raw = buf.into_raw();
        assert_eq!(raw.id(), 0);
        assert_eq!(pool.uninit_count(), 0);
        let buf = NetBuf::from_raw(raw);
        assert_eq!(buf.ref_count(), 1);
        drop(buf);
        assert_eq!(pool.uninit_count(), 1);
    }

    #[test]
    fn guard_exposes_cursor_and_user_data() {
        let pool = pool(1);
        let buf = pool.alloc(Timeout::NoWait).expect("分配");
        {
            let mut guard = buf.lock();
            guard.reserve(4);
            guard.add_le16(0xbeef);
            guard.user_data_mut().copy_from_slice(&[1, 2, 3, 4]);
            assert_eq!(guard.user_data(), &[1, 2, 3, 4]);
        }
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.headroom(), 4);
        assert_eq!(buf.to_vec(), vec![0xef, 0xbe]);
    }

    #[test]
    fn deep_clone_copies_headroom_and_payload() {
        let pool = pool(2);
        let buf = pool.alloc(Timeout::NoWait).expect("分配");
        buf.reserve(3);
        buf.add_mem(b"abc");
        let copy = buf.deep_clone(Timeout::NoWait).expect("克隆");
        assert!(!copy.same_buf(&buf));
        assert_eq!(copy.headroom(), 3);
        assert_eq!(copy.to_vec(), b"abc");
        assert!(buf.deep_clone(Timeout::NoWait).is_none());
    }
}
