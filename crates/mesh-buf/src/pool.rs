use alloc::{borrow::Cow, boxed::Box, sync::Arc, vec::Vec};
use core::{
    fmt,
    panic::Location,
    sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering},
};

use spin::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

use crate::{
    BufError, Result,
    buf::{DestroyHook, NetBuf, ReleasedBuf},
    lock::{CriticalSectionLock, IrqGuard, IrqLock},
    simple::NetBufSimple,
};

/// 引用计数字的低 8 位保存计数，与源系统的 `uint8_t ref` 保持同一上限。
pub(crate) const REF_MASK: u32 = 0xff;
/// 计数归零后、销毁流程完成前置位，阻止分配器提前复用槽位。
const RELEASING: u32 = 0x100;

/// 分配超时参数。
///
/// 仅为接口兼容保留：分配器永不阻塞，任何取值在池耗尽时都立即返回失败。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Timeout {
    /// 立即返回（`K_NO_WAIT`）。
    #[default]
    NoWait,
    /// 无限等待（`K_FOREVER`），本实现按 `NoWait` 处理。
    Forever,
    /// 等待指定毫秒数，本实现按 `NoWait` 处理。
    Millis(u32),
}

/// 一次 `unref` 对单个槽位计数的影响。
enum RefDrop {
    Alive(u32),
    Last,
    DoubleFree,
}

pub(crate) struct SlotState {
    pub(crate) frags: Option<NetBuf>,
    pub(crate) simple: NetBufSimple,
    pub(crate) user_data: Box<[u8]>,
}

/// 池中的一个定长槽位：原子引用计数与标志字节，外加受自旋锁保护的游标与分片链接。
///
/// # 锁序约束
/// - `state` 自旋锁可能被任务上下文经 `NetBufGuard` 长时间持有；
/// - 因此任何 `IrqGuard` 临界区内只允许访问 `refs` 与 `flags` 两个原子字段，绝不获取 `state`，
///   否则持锁任务一旦进入临界区（分配、销毁、队列操作）就会与临界区内的自旋互相等待。
pub(crate) struct Slot {
    refs: AtomicU32,
    flags: AtomicU8,
    pub(crate) state: Mutex<SlotState>,
}

impl Slot {
    fn new(data_size: usize, user_data_size: usize) -> Self {
        Self {
            refs: AtomicU32::new(0),
            flags: AtomicU8::new(0),
            state: Mutex::new(SlotState {
                frags: None,
                simple: NetBufSimple::new(data_size),
                user_data: alloc::vec![0u8; user_data_size].into_boxed_slice(),
            }),
        }
    }

    pub(crate) fn flags(&self) -> u8 {
        self.flags.load(Ordering::Acquire)
    }

    pub(crate) fn set_flags(&self, bits: u8) {
        self.flags.fetch_or(bits, Ordering::AcqRel);
    }

    pub(crate) fn clear_flags(&self, bits: u8) {
        self.flags.fetch_and(!bits, Ordering::AcqRel);
    }

    pub(crate) fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire) & REF_MASK
    }

    /// 仅当计数为零且不处于销毁流程时占用槽位。
    fn try_claim(&self) -> bool {
        self.refs
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// 计数加一；达到上限时饱和，返回 `Err(当前计数)`。
    pub(crate) fn add_ref(&self) -> core::result::Result<u32, u32> {
        self.refs
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |word| {
                let count = word & REF_MASK;
                if count == 0 || count == REF_MASK {
                    None
                } else {
                    Some(word + 1)
                }
            })
            .map(|prev| (prev & REF_MASK) + 1)
            .map_err(|word| word & REF_MASK)
    }

    fn drop_ref(&self) -> RefDrop {
        let prev = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                match word & REF_MASK {
                    0 => None,
                    1 => Some(RELEASING),
                    _ => Some(word - 1),
                }
            });
        match prev {
            Err(_) => RefDrop::DoubleFree,
            Ok(word) if word & REF_MASK == 1 => RefDrop::Last,
            Ok(word) => RefDrop::Alive((word & REF_MASK) - 1),
        }
    }
}

pub(crate) struct PoolShared {
    name: Cow<'static, str>,
    data_size: usize,
    user_data_size: usize,
    /// 尚可分配的槽位数；只在临界区内修改。
    uninit_count: AtomicUsize,
    #[cfg(feature = "pool-usage")]
    avail_count: AtomicUsize,
    destroy: Option<Arc<dyn DestroyHook>>,
    lock: Arc<dyn IrqLock>,
    slots: Box<[Slot]>,
}

/// `NetBufPool` 是定长缓冲槽位的固定容量竞技场（`net_buf_pool`）。
///
/// # 模块角色（Why）
/// - Mesh 协议栈的所有收发路径都从若干静态池中取缓冲；池在创建后容量不变，
///   避免堆碎片与不可预期的分配延迟；
/// - 句柄基于 `Arc`，可以廉价克隆并在任务与中断上下文之间共享。
///
/// # 核心机制（How）
/// - 槽位数组在创建时一次性分配，每个槽位带有独立的原子引用计数；
/// - `alloc` 在 [`IrqLock`] 临界区内检查 `uninit_count`，并从最高索引向下扫描计数为零的槽位；
///   临界区内只做计数与占用，不执行任何日志或回调；
/// - 释放路径在计数归零后先派发销毁钩子，再在临界区内把槽位标记为空闲并归还计数。
///
/// # 契约说明（What）
/// - 同时存活（计数大于零）的缓冲数不超过 `buf_count`；
/// - `alloc` 从不阻塞，池耗尽时立即返回 `None`；
/// - 未实现“后进先出复用最近释放槽位”的快速路径，始终线性扫描。
#[derive(Clone)]
pub struct NetBufPool {
    pub(crate) shared: Arc<PoolShared>,
}

impl NetBufPool {
    /// 创建固定容量的池（`NET_BUF_POOL_DEFINE`）。
    ///
    /// 尺寸在源系统中是编译期常量，因此这里没有错误返回：零容量或零数据区属于编程错误。
    /// 运行时配置请使用 [`PoolConfig`](crate::PoolConfig)。
    ///
    /// # Panics
    /// `buf_count` 或 `data_size` 为零时 panic。
    pub fn new(
        name: &'static str,
        buf_count: u16,
        data_size: u16,
        user_data_size: u8,
        destroy: Option<Arc<dyn DestroyHook>>,
    ) -> Self {
        assert!(buf_count > 0, "池 `{name}` 的 buf_count 必须大于 0");
        assert!(data_size > 0, "池 `{name}` 的 data_size 必须大于 0");
        Self::from_parts(
            Cow::Borrowed(name),
            usize::from(buf_count),
            usize::from(data_size),
            usize::from(user_data_size),
            destroy,
            Arc::new(CriticalSectionLock),
        )
    }

    /// 由已校验的参数构建池，供 [`PoolConfig::build`](crate::PoolConfig::build) 复用。
    pub(crate) fn from_parts(
        name: Cow<'static, str>,
        buf_count: usize,
        data_size: usize,
        user_data_size: usize,
        destroy: Option<Arc<dyn DestroyHook>>,
        lock: Arc<dyn IrqLock>,
    ) -> Self {
        let slots: Vec<Slot> = (0..buf_count)
            .map(|_| Slot::new(data_size, user_data_size))
            .collect();
        debug!(
            pool = %name,
            buf_count,
            data_size,
            user_data_size,
            "net_buf pool created"
        );
        Self {
            shared: Arc::new(PoolShared {
                name,
                data_size,
                user_data_size,
                uninit_count: AtomicUsize::new(buf_count),
                #[cfg(feature = "pool-usage")]
                avail_count: AtomicUsize::new(buf_count),
                destroy,
                lock,
                slots: slots.into_boxed_slice(),
            }),
        }
    }

    /// 池名称，用于日志与统计。
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 槽位总数。
    pub fn buf_count(&self) -> usize {
        self.shared.slots.len()
    }

    /// 每个槽位的数据区大小。
    pub fn data_size(&self) -> usize {
        self.shared.data_size
    }

    /// 每个槽位的用户元数据大小。
    pub fn user_data_size(&self) -> usize {
        self.shared.user_data_size
    }

    /// 尚可分配的槽位数。
    pub fn uninit_count(&self) -> usize {
        self.shared.uninit_count.load(Ordering::Relaxed)
    }

    /// 可用缓冲数（`CONFIG_BLE_MESH_NET_BUF_POOL_USAGE` 诊断计数）。
    #[cfg(feature = "pool-usage")]
    pub fn avail_count(&self) -> usize {
        self.shared.avail_count.load(Ordering::Relaxed)
    }

    /// 两个句柄是否指向同一个池。
    pub fn ptr_eq(&self, other: &NetBufPool) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// 从池中分配一个缓冲。
    ///
    /// # 契约说明
    /// - 返回的缓冲引用计数为 1，头部预留与长度均为 0，标志清零且没有分片；
    /// - `timeout` 只为接口兼容保留，池耗尽时无论取值如何都立即返回 `None`。
    #[track_caller]
    pub fn alloc(&self, timeout: Timeout) -> Option<NetBuf> {
        let caller = Location::caller();
        let shared = &*self.shared;
        let claimed = {
            let _irq = IrqGuard::enter(shared.lock.as_ref());
            if shared.uninit_count.load(Ordering::Relaxed) == 0 {
                Err(false)
            } else {
                let found = shared
                    .slots
                    .iter()
                    .enumerate()
                    .rev()
                    .find(|(_, slot)| slot.try_claim())
                    .map(|(index, _)| index);
                match found {
                    Some(index) => {
                        shared.uninit_count.fetch_sub(1, Ordering::Relaxed);
                        #[cfg(feature = "pool-usage")]
                        shared.avail_count.fetch_sub(1, Ordering::Relaxed);
                        Ok(index)
                    }
                    None => Err(true),
                }
            }
        };

        let index = match claimed {
            Ok(index) => index,
            Err(inconsistent) => {
                if inconsistent {
                    error!(
                        pool = %shared.name,
                        uninit_count = shared.uninit_count.load(Ordering::Relaxed),
                        "net_buf pool counters claim free slots but none has a zero refcount"
                    );
                } else {
                    debug!(
                        pool = %shared.name,
                        ?timeout,
                        %caller,
                        "net_buf pool exhausted, allocation does not block"
                    );
                }
                return None;
            }
        };

        {
            let slot = &shared.slots[index];
            slot.flags.store(0, Ordering::Release);
            let mut state = slot.state.lock();
            debug_assert!(state.frags.is_none(), "空闲槽位不应残留分片链接");
            state.frags = None;
            state.simple.reset();
            state.user_data.fill(0);
        }
        trace!(pool = %shared.name, id = index, %caller, "net_buf alloc");
        Some(NetBuf::from_slot(self.clone(), index as u16))
    }

    /// 与 [`alloc`](Self::alloc) 相同，但把池耗尽映射为 [`BufError::PoolExhausted`]。
    #[track_caller]
    pub fn try_alloc(&self, timeout: Timeout) -> Result<NetBuf> {
        self.alloc(timeout).ok_or_else(|| BufError::PoolExhausted {
            pool: self.shared.name.clone(),
        })
    }

    /// 读取池的诊断快照。
    pub fn stats(&self) -> PoolStats {
        let in_use = self
            .shared
            .slots
            .iter()
            .filter(|slot| slot.refs.load(Ordering::Relaxed) != 0)
            .count();
        PoolStats {
            name: self.shared.name.clone(),
            buf_count: self.buf_count(),
            uninit_count: self.uninit_count(),
            #[cfg(feature = "pool-usage")]
            avail_count: self.avail_count(),
            in_use,
        }
    }

    pub(crate) fn slot(&self, index: u16) -> &Slot {
        &self.shared.slots[usize::from(index)]
    }

    pub(crate) fn state(&self, index: u16) -> MutexGuard<'_, SlotState> {
        self.slot(index).state.lock()
    }

    /// 释放一个槽位上的一次引用；计数归零时派发销毁并返回被摘下的分片链接。
    pub(crate) fn release_one(&self, index: u16) -> Option<NetBuf> {
        let slot = self.slot(index);
        match slot.drop_ref() {
            RefDrop::Alive(remaining) => {
                trace!(pool = %self.shared.name, id = index, remaining, "net_buf unref");
                None
            }
            RefDrop::DoubleFree => {
                error!(
                    pool = %self.shared.name,
                    id = index,
                    "net_buf double free detected, refcount already zero"
                );
                debug_assert!(
                    false,
                    "net_buf 重复释放：池 `{}` 槽位 {index} 的引用计数已为 0",
                    self.shared.name
                );
                None
            }
            RefDrop::Last => {
                let next = slot.state.lock().frags.take();
                trace!(
                    pool = %self.shared.name,
                    id = index,
                    has_frags = next.is_some(),
                    "net_buf destroy"
                );
                let released = ReleasedBuf::new(self.clone(), index);
                match &self.shared.destroy {
                    Some(hook) => hook.destroy(released),
                    None => released.finish(),
                }
                next
            }
        }
    }

    /// 完成销毁：复位游标，并在临界区内把槽位归还为空闲。
    pub(crate) fn finish_destroy(&self, index: u16) {
        let slot = self.slot(index);
        slot.flags.store(0, Ordering::Release);
        slot.state.lock().simple.reset();
        let shared = &*self.shared;
        let _irq = IrqGuard::enter(shared.lock.as_ref());
        slot.refs.store(0, Ordering::Release);
        shared.uninit_count.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "pool-usage")]
        shared.avail_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl PartialEq for NetBufPool {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for NetBufPool {}

impl fmt::Debug for NetBufPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBufPool")
            .field("name", &self.shared.name)
            .field("buf_count", &self.buf_count())
            .field("data_size", &self.shared.data_size)
            .field("uninit_count", &self.uninit_count())
            .finish()
    }
}

/// 池的诊断快照。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolStats {
    pub name: Cow<'static, str>,
    pub buf_count: usize,
    /// 尚可分配的槽位数。
    pub uninit_count: usize,
    #[cfg(feature = "pool-usage")]
    pub avail_count: usize,
    /// 引用计数非零（含销毁流程中）的槽位数。
    pub in_use: usize,
}
