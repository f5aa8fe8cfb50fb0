#![cfg_attr(not(feature = "std"), no_std)]

//! `mesh-buf` 提供 BLE-Mesh 协议栈使用的池化网络缓冲。
//!
//! # 模块定位（Why）
//! - 协议栈的收发、分段重组与广播承载都依赖定长缓冲；缓冲来自容量固定的池，
//!   通过引用计数在多个持有者之间共享，并可串成分片链承载超过单槽容量的 PDU；
//! - 池的计数器会在中断上下文中被修改，所有修改都发生在可注入的中断锁临界区内。
//!
//! # 设计概要（How）
//! - [`NetBufPool`]：槽位竞技场与分配器，`alloc` 从不阻塞；
//! - [`NetBuf`]：计数句柄，`Drop` 即 `unref`，归零时派发 [`DestroyHook`] 并沿分片链迭代释放；
//! - [`NetBufSimple`]：单一数据区上的游标操作，带边界断言与显式字节序的标量编解码；
//! - [`NetBufList`]：以展平形式排队整条分片链；
//! - [`IrqLock`]：中断级临界区抽象，默认实现基于 `critical-section`。
//!
//! # Feature
//! - `std`（默认）：启用 `critical-section` 的宿主实现，便于在测试中直接使用；
//! - `pool-usage`（默认）：维护 `avail_count` 诊断计数；
//! - `serde`：提供可反序列化的 [`PoolSettings`]。

extern crate alloc;

mod buf;
mod config;
mod error;
mod frag;
mod list;
mod lock;
mod macros;
mod pool;
mod simple;

pub use buf::{DestroyHook, NET_BUF_FRAGS, NetBuf, NetBufGuard, RawNetBuf, ReleasedBuf};
#[cfg(feature = "serde")]
pub use config::PoolSettings;
pub use config::{DEFAULT_USER_DATA_SIZE, PoolConfig, SlotLayout};
pub use error::{BufError, Result, codes};
pub use frag::Chain;
pub use list::NetBufList;
pub use lock::{CriticalSectionLock, IrqGuard, IrqKey, IrqLock};
pub use pool::{NetBufPool, PoolStats, Timeout};
pub use simple::{NetBufSimple, NetBufSimpleState};

#[doc(hidden)]
pub mod __private {
    pub use alloc::sync::Arc;
    pub use spin::Lazy;
}
