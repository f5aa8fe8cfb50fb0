use alloc::{borrow::Cow, sync::Arc};
use core::{fmt, mem};

use crate::{
    BufError, NetBufPool, Result,
    buf::DestroyHook,
    lock::{CriticalSectionLock, IrqLock},
    pool::Slot,
};

/// 默认用户元数据大小（`BLE_MESH_NET_BUF_USER_DATA_SIZE`）。
pub const DEFAULT_USER_DATA_SIZE: usize = 4;

/// `PoolConfig` 以构建器形式描述一个运行时创建的池。
///
/// # 契约说明（What）
/// - `buf_count`、`data_size` 必须落在 `1..=u16::MAX`；
/// - `user_data_size` 不得超过 `u8::MAX`，默认 [`DEFAULT_USER_DATA_SIZE`]；
/// - 未指定锁时使用 [`CriticalSectionLock`]；未指定销毁钩子时计数归零即归还槽位。
#[derive(Clone)]
pub struct PoolConfig {
    name: Cow<'static, str>,
    buf_count: usize,
    data_size: usize,
    user_data_size: usize,
    destroy: Option<Arc<dyn DestroyHook>>,
    lock: Option<Arc<dyn IrqLock>>,
}

impl PoolConfig {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            buf_count: 0,
            data_size: 0,
            user_data_size: DEFAULT_USER_DATA_SIZE,
            destroy: None,
            lock: None,
        }
    }

    pub fn buf_count(mut self, buf_count: usize) -> Self {
        self.buf_count = buf_count;
        self
    }

    pub fn data_size(mut self, data_size: usize) -> Self {
        self.data_size = data_size;
        self
    }

    pub fn user_data_size(mut self, user_data_size: usize) -> Self {
        self.user_data_size = user_data_size;
        self
    }

    pub fn destroy_hook(mut self, hook: impl DestroyHook) -> Self {
        self.destroy = Some(Arc::new(hook));
        self
    }

    pub fn lock(mut self, lock: Arc<dyn IrqLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 校验全部字段，返回首个越界字段对应的错误。
    pub fn validate(&self) -> Result<()> {
        let limit = usize::from(u16::MAX);
        if self.buf_count == 0 || self.buf_count > limit {
            return Err(BufError::invalid("buf_count", "must be within 1..=65535"));
        }
        if self.data_size == 0 || self.data_size > limit {
            return Err(BufError::invalid("data_size", "must be within 1..=65535"));
        }
        if self.user_data_size > usize::from(u8::MAX) {
            return Err(BufError::invalid("user_data_size", "must not exceed 255"));
        }
        Ok(())
    }

    /// 槽位内存布局，用于容量规划与诊断。
    pub fn slot_layout(&self) -> SlotLayout {
        SlotLayout {
            header: mem::size_of::<Slot>(),
            data: round_up4(self.data_size),
            user_data: round_up4(self.user_data_size),
        }
    }

    /// 校验并创建池。
    pub fn build(self) -> Result<NetBufPool> {
        self.validate()?;
        Ok(NetBufPool::from_parts(
            self.name,
            self.buf_count,
            self.data_size,
            self.user_data_size,
            self.destroy,
            self.lock.unwrap_or_else(|| Arc::new(CriticalSectionLock)),
        ))
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("name", &self.name)
            .field("buf_count", &self.buf_count)
            .field("data_size", &self.data_size)
            .field("user_data_size", &self.user_data_size)
            .field("destroy_hook", &self.destroy.is_some())
            .field("custom_lock", &self.lock.is_some())
            .finish()
    }
}

impl NetBufPool {
    /// 以 `name` 开始构建运行时配置的池。
    pub fn builder(name: impl Into<Cow<'static, str>>) -> PoolConfig {
        PoolConfig::new(name)
    }
}

/// 单个槽位的内存占用：`header + round_up(data, 4) + round_up(user_data, 4)`。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SlotLayout {
    pub header: usize,
    pub data: usize,
    pub user_data: usize,
}

impl SlotLayout {
    pub fn slot_size(&self) -> usize {
        self.header + self.data + self.user_data
    }
}

const fn round_up4(value: usize) -> usize {
    (value + 3) & !3
}

/// 可从 TOML/JSON 反序列化的池参数，通过 `PoolConfig::from` 转为构建器。
#[cfg(feature = "serde")]
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PoolSettings {
    pub name: alloc::string::String,
    pub buf_count: usize,
    pub data_size: usize,
    #[serde(default = "default_user_data_size")]
    pub user_data_size: usize,
}

#[cfg(feature = "serde")]
fn default_user_data_size() -> usize {
    DEFAULT_USER_DATA_SIZE
}

#[cfg(feature = "serde")]
impl From<PoolSettings> for PoolConfig {
    fn from(settings: PoolSettings) -> Self {
        PoolConfig::new(settings.name)
            .buf_count(settings.buf_count)
            .data_size(settings.data_size)
            .user_data_size(settings.user_data_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_rounds_regions_to_words() {
        let layout = PoolConfig::new("layout")
            .buf_count(1)
            .data_size(5)
            .user_data_size(1)
            .slot_layout();
        assert_eq!(layout.data, 8);
        assert_eq!(layout.user_data, 4);
        assert_eq!(layout.slot_size(), layout.header + 12);
    }

    #[test]
    fn defaults_fail_until_sizes_are_set() {
        let err = PoolConfig::new("empty").validate().expect_err("缺少容量");
        assert_eq!(err, BufError::invalid("buf_count", "must be within 1..=65535"));
    }
}
