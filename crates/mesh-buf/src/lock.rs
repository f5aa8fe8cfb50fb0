use core::fmt;

/// `IrqLock` 抽象中断级临界区（`irq_lock`/`irq_unlock`）。
///
/// # 设计初衷（Why）
/// - 缓冲池的分配与释放会在 ISR 中被调用，守护池计数器的原语必须可在最受限的执行上下文中使用，
///   不能是可能阻塞或被同一上下文重入后死锁的操作系统互斥量；
/// - 通过 trait 注入，宿主测试可以替换为带计数的探针实现，嵌入式目标则直接映射到平台临界区。
///
/// # 契约定义（What）
/// - `acquire`：进入临界区并返回恢复所需的不透明 [`IrqKey`]；
/// - `release`：使用 `acquire` 返回的键恢复先前状态；
/// - **前置条件**：多次嵌套获取时，必须按照与获取相反的顺序逐一释放；
/// - **后置条件**：临界区内的代码不会被同一处理器上的中断打断，也不会与其它持有者并发执行。
pub trait IrqLock: Send + Sync + 'static {
    /// 进入临界区。
    fn acquire(&self) -> IrqKey;

    /// 离开临界区。
    ///
    /// # Safety
    /// `key` 必须来自同一个锁实例上尚未释放的 `acquire`，且嵌套释放顺序与获取顺序相反。
    /// 违反该约束可能恢复错误的中断状态。
    unsafe fn release(&self, key: IrqKey);
}

/// 临界区恢复键。
///
/// 键不可复制，确保一次获取只能对应一次释放。自定义实现通过 [`IrqKey::from_bits`]
/// 携带平台返回的中断状态字。
pub struct IrqKey {
    repr: KeyRepr,
}

enum KeyRepr {
    Bits(u32),
    CriticalSection(critical_section::RestoreState),
}

impl IrqKey {
    /// 以平台状态字构造键，供自定义 [`IrqLock`] 实现使用。
    pub const fn from_bits(bits: u32) -> Self {
        Self {
            repr: KeyRepr::Bits(bits),
        }
    }

    /// 读取自定义实现写入的状态字；默认实现产生的键返回 `None`。
    pub fn bits(&self) -> Option<u32> {
        match self.repr {
            KeyRepr::Bits(bits) => Some(bits),
            KeyRepr::CriticalSection(_) => None,
        }
    }
}

impl fmt::Debug for IrqKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            KeyRepr::Bits(bits) => f.debug_tuple("IrqKey").field(bits).finish(),
            KeyRepr::CriticalSection(_) => f.write_str("IrqKey(critical-section)"),
        }
    }
}

/// 基于 `critical-section` crate 的默认实现。
///
/// - 嵌入式目标上由 HAL 提供的实现关闭中断（多核芯片上同时获取跨核自旋锁）；
/// - 宿主机上启用 `std` Feature 后，`critical-section` 使用进程级可重入锁模拟。
#[derive(Clone, Copy, Debug, Default)]
pub struct CriticalSectionLock;

impl IrqLock for CriticalSectionLock {
    fn acquire(&self) -> IrqKey {
        // SAFETY: 返回的 RestoreState 被封装在不可复制的 IrqKey 中，
        // 只能通过 `release` 归还一次；嵌套顺序由调用方（IrqGuard）保证。
        let state = unsafe { critical_section::acquire() };
        IrqKey {
            repr: KeyRepr::CriticalSection(state),
        }
    }

    unsafe fn release(&self, key: IrqKey) {
        match key.repr {
            // SAFETY: 调用方保证键来自本实现的 `acquire` 且按逆序释放。
            KeyRepr::CriticalSection(state) => unsafe { critical_section::release(state) },
            KeyRepr::Bits(bits) => {
                panic!("CriticalSectionLock::release 收到外部实现的键 {bits:#x}")
            }
        }
    }
}

/// 作用域内的临界区守卫，`Drop` 时自动释放。
///
/// 池内部所有临界区都经由该守卫进入，保证提前返回时也不会遗漏 `release`。
#[must_use = "守卫被丢弃时立即离开临界区"]
pub struct IrqGuard<'a> {
    lock: &'a dyn IrqLock,
    key: Option<IrqKey>,
}

impl<'a> IrqGuard<'a> {
    /// 进入 `lock` 描述的临界区。
    pub fn enter(lock: &'a dyn IrqLock) -> Self {
        let key = lock.acquire();
        Self {
            lock,
            key: Some(key),
        }
    }
}

impl Drop for IrqGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            // SAFETY: 键来自构造时的 `acquire`；守卫按作用域嵌套，析构顺序与获取顺序相反。
            unsafe { self.lock.release(key) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_nests_and_releases_in_reverse_order() {
        let lock = CriticalSectionLock;
        let outer = IrqGuard::enter(&lock);
        {
            let _inner = IrqGuard::enter(&lock);
        }
        drop(outer);
        // 全部释放后应能再次进入。
        let _again = IrqGuard::enter(&lock);
    }

    #[test]
    fn custom_keys_round_trip_bits() {
        let key = IrqKey::from_bits(0x5a);
        assert_eq!(key.bits(), Some(0x5a));
        let cs_key = CriticalSectionLock.acquire();
        assert_eq!(cs_key.bits(), None);
        unsafe { CriticalSectionLock.release(cs_key) };
    }
}
