//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 只承载可恢复的失败：池耗尽与运行时配置被拒绝；
//! - 越界、非法拆链、重复释放等编程错误走断言，不在这里建模。
//!
//! ## 设计要求（What）
//! - 错误类型派生 `thiserror::Error`，在 `no_std` 下同样可用；
//! - 每个变体映射到 [`codes`] 中的稳定错误码，遵循 `<领域>.<语义>` 命名约定。

use alloc::borrow::Cow;

use thiserror::Error;

/// 稳定错误码集合，便于在日志与告警中检索聚合。
pub mod codes {
    /// 池中没有可分配的槽位。
    pub const POOL_EXHAUSTED: &str = "pool.exhausted";
    /// 池配置未通过校验。
    pub const CONFIG_INVALID: &str = "config.invalid";
}

/// 缓冲池错误域。
///
/// - **意图 (Why)**：池耗尽是正常的背压信号，调用方需要据此丢包或延后重试；
/// - **契约 (What)**：所有变体均为 `Send + Sync + 'static`，携带池名或字段名作为上下文；
/// - **设计权衡 (Trade-offs)**：池名使用 `Cow<'static, str>`，静态池零分配，运行时配置的池克隆一次字符串。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BufError {
    /// 分配时池内没有空闲槽位。分配从不阻塞，超时参数不会改变该结果。
    #[error("net_buf pool `{pool}` is exhausted")]
    PoolExhausted { pool: Cow<'static, str> },

    /// [`PoolConfig`](crate::PoolConfig) 的某个字段越界。
    #[error("invalid net_buf pool configuration `{field}`: {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: Cow<'static, str>,
    },
}

impl BufError {
    /// 对应的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::PoolExhausted { .. } => codes::POOL_EXHAUSTED,
            Self::InvalidConfig { .. } => codes::CONFIG_INVALID,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

/// 本 crate 的 `Result` 别名。
pub type Result<T, E = BufError> = core::result::Result<T, E>;
