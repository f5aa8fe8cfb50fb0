use alloc::{boxed::Box, vec};
use core::fmt;

use bytes::{Buf, BufMut, buf::UninitSlice};

/// `NetBufSimple` 是单块数据区上的游标视图：头部预留、有效负载与尾部空间。
///
/// # 设计动机（Why）
/// - 协议栈在组帧时需要“尾部追加负载、头部前插报头、解析时从头部消费”三种游标操作，
///   这三者共享同一块定长存储，不能引入任何动态扩容；
/// - 池化缓冲 [`NetBuf`](crate::NetBuf) 内部持有一个 `NetBufSimple`，栈上或静态缓冲也可以直接使用本类型。
///
/// # 数据布局（How）
/// ```text
/// |<-- headroom -->|<-- data (len) -->|<-- tailroom -->|
/// 0              head             head+len        capacity
/// ```
/// - `storage` 可以是 `Box<[u8]>`、定长数组或外部借用的切片；只读操作要求 `AsRef<[u8]>`，
///   写入操作额外要求 `AsMut<[u8]>`。
///
/// # 契约说明（What）
/// - 始终满足 `head + len <= capacity`；
/// - 所有越界的 `add`/`push`/`pull` 都以 panic 终止，绝不截断，避免协议帧被静默破坏；
/// - 多字节辅助函数严格按照声明的大小端编码，与宿主字节序无关。
pub struct NetBufSimple<S = Box<[u8]>> {
    storage: S,
    head: usize,
    len: usize,
}

/// 保存的解析状态，对应 `net_buf_simple_state`。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NetBufSimpleState {
    /// 数据起点相对存储起点的偏移。
    pub offset: u16,
    /// 有效数据长度。
    pub len: u16,
}

impl NetBufSimple<Box<[u8]>> {
    /// 在堆上分配 `size` 字节的零初始化存储。
    pub fn new(size: usize) -> Self {
        Self::with_storage(vec![0u8; size].into_boxed_slice())
    }
}

impl<const N: usize> NetBufSimple<[u8; N]> {
    /// 以内联数组作为存储，适用于栈上或 `static` 缓冲（`NET_BUF_SIMPLE_DEFINE`）。
    pub const fn new_inline() -> Self {
        Self::with_storage([0u8; N])
    }
}

impl<S> NetBufSimple<S> {
    /// 以给定存储构造空缓冲，游标位于存储起点。
    pub const fn with_storage(storage: S) -> Self {
        Self {
            storage,
            head: 0,
            len: 0,
        }
    }

    /// 释放游标，取回底层存储。
    pub fn into_storage(self) -> S {
        self.storage
    }

    /// 当前有效数据长度。
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否没有有效数据。
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 头部可前插的字节数。
    pub fn headroom(&self) -> usize {
        self.head
    }

    /// 清空数据并把游标移回存储起点。
    pub fn reset(&mut self) {
        self.len = 0;
        self.head = 0;
    }

    /// 以 `reserve_head` 字节的头部预留重新初始化（`net_buf_simple_init`）。
    pub fn init(&mut self, reserve_head: usize)
    where
        S: AsRef<[u8]>,
    {
        self.len = 0;
        self.head = 0;
        self.reserve(reserve_head);
    }

    /// 保存解析状态，便于把缓冲交给不受控的解析例程后再恢复。
    ///
    /// # Panics
    /// 状态以 16 位字段保存；头部偏移或数据长度超过 `u16::MAX` 时 panic，不做截断。
    #[track_caller]
    pub fn save(&self) -> NetBufSimpleState {
        let (Ok(offset), Ok(len)) = (u16::try_from(self.head), u16::try_from(self.len)) else {
            panic!(
                "save 越界：偏移 {} 或长度 {} 超出 u16 范围",
                self.head, self.len
            );
        };
        NetBufSimpleState { offset, len }
    }
}

impl<S: AsRef<[u8]>> NetBufSimple<S> {
    /// 以已填满的外部数据构造缓冲（`net_buf_simple_init_with_data`）：`len == capacity`。
    pub fn with_data(storage: S) -> Self {
        let len = storage.as_ref().len();
        Self {
            storage,
            head: 0,
            len,
        }
    }

    /// 存储总容量。
    pub fn capacity(&self) -> usize {
        self.storage.as_ref().len()
    }

    /// 尾部可追加的字节数。
    pub fn tailroom(&self) -> usize {
        self.capacity() - self.head - self.len
    }

    /// 有效数据视图。
    pub fn data(&self) -> &[u8] {
        &self.storage.as_ref()[self.head..self.head + self.len]
    }

    /// 有效数据末尾在存储中的偏移（`net_buf_simple_tail`）。
    pub fn tail(&self) -> usize {
        self.head + self.len
    }

    /// 在空缓冲上预留头部空间。
    ///
    /// # Panics
    /// 缓冲非空或 `reserve` 超过容量时 panic。
    pub fn reserve(&mut self, reserve: usize) {
        assert!(
            self.len == 0,
            "reserve 只能作用于空缓冲：当前长度 {}",
            self.len
        );
        assert!(
            reserve <= self.capacity(),
            "reserve 越界：请求 {reserve} 字节，容量 {}",
            self.capacity()
        );
        self.head = reserve;
    }

    /// 恢复由 [`save`](Self::save) 保存的解析状态。
    ///
    /// # Panics
    /// 状态超出存储范围时 panic。
    pub fn restore(&mut self, state: NetBufSimpleState) {
        let offset = usize::from(state.offset);
        let len = usize::from(state.len);
        assert!(
            offset + len <= self.capacity(),
            "restore 越界：offset {offset} + len {len} 超过容量 {}",
            self.capacity()
        );
        self.head = offset;
        self.len = len;
    }

    /// 共享同一存储、携带相同游标的只读副本（`net_buf_simple_clone`）。
    ///
    /// 副本上的 `pull` 不会影响原缓冲的游标。
    pub fn clone_view(&self) -> NetBufSimple<&[u8]> {
        NetBufSimple {
            storage: self.storage.as_ref(),
            head: self.head,
            len: self.len,
        }
    }

    /// 从头部消费 `len` 字节，返回被消费的区域（推进前的头部）。
    ///
    /// # Panics
    /// 有效数据不足 `len` 字节时 panic。
    pub fn pull(&mut self, len: usize) -> &[u8] {
        assert!(
            self.len >= len,
            "pull 越界：请求 {len} 字节，有效数据 {}",
            self.len
        );
        let start = self.head;
        self.head += len;
        self.len -= len;
        &self.storage.as_ref()[start..start + len]
    }

    /// 与 [`pull`](Self::pull) 相同，语义上强调调用方需要读取被消费的字节。
    pub fn pull_mem(&mut self, len: usize) -> &[u8] {
        self.pull(len)
    }

    fn pull_array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.pull(N));
        out
    }

    pub fn pull_u8(&mut self) -> u8 {
        self.pull(1)[0]
    }

    pub fn pull_le16(&mut self) -> u16 {
        u16::from_le_bytes(self.pull_array())
    }

    pub fn pull_be16(&mut self) -> u16 {
        u16::from_be_bytes(self.pull_array())
    }

    pub fn pull_le24(&mut self) -> u32 {
        let [b0, b1, b2] = self.pull_array();
        u32::from_le_bytes([b0, b1, b2, 0])
    }

    pub fn pull_be24(&mut self) -> u32 {
        let [b0, b1, b2] = self.pull_array();
        u32::from_be_bytes([0, b0, b1, b2])
    }

    pub fn pull_le32(&mut self) -> u32 {
        u32::from_le_bytes(self.pull_array())
    }

    pub fn pull_be32(&mut self) -> u32 {
        u32::from_be_bytes(self.pull_array())
    }

    pub fn pull_le48(&mut self) -> u64 {
        let [b0, b1, b2, b3, b4, b5] = self.pull_array();
        u64::from_le_bytes([b0, b1, b2, b3, b4, b5, 0, 0])
    }

    pub fn pull_be48(&mut self) -> u64 {
        let [b0, b1, b2, b3, b4, b5] = self.pull_array();
        u64::from_be_bytes([0, 0, b0, b1, b2, b3, b4, b5])
    }

    pub fn pull_le64(&mut self) -> u64 {
        u64::from_le_bytes(self.pull_array())
    }

    pub fn pull_be64(&mut self) -> u64 {
        u64::from_be_bytes(self.pull_array())
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> NetBufSimple<S> {
    /// 有效数据的可变视图。
    pub fn data_mut(&mut self) -> &mut [u8] {
        let (head, len) = (self.head, self.len);
        &mut self.storage.as_mut()[head..head + len]
    }

    /// 尾部空闲区域（`net_buf_simple_tail` 之后的全部空间）。
    pub fn tail_mut(&mut self) -> &mut [u8] {
        let end = self.head + self.len;
        &mut self.storage.as_mut()[end..]
    }

    /// 在尾部追加 `len` 字节，返回新追加的区域供调用方写入。
    ///
    /// # Panics
    /// 尾部空间不足时 panic。
    pub fn add(&mut self, len: usize) -> &mut [u8] {
        let tailroom = self.tailroom();
        assert!(
            tailroom >= len,
            "add 越界：请求 {len} 字节，尾部空间 {tailroom}"
        );
        let start = self.head + self.len;
        self.len += len;
        &mut self.storage.as_mut()[start..start + len]
    }

    /// 复制 `mem` 到尾部。
    pub fn add_mem(&mut self, mem: &[u8]) -> &mut [u8] {
        let region = self.add(mem.len());
        region.copy_from_slice(mem);
        region
    }

    pub fn add_u8(&mut self, val: u8) -> &mut u8 {
        let region = self.add(1);
        region[0] = val;
        &mut region[0]
    }

    pub fn add_le16(&mut self, val: u16) {
        self.add_mem(&val.to_le_bytes());
    }

    pub fn add_be16(&mut self, val: u16) {
        self.add_mem(&val.to_be_bytes());
    }

    pub fn add_le24(&mut self, val: u32) {
        self.add_mem(&val.to_le_bytes()[..3]);
    }

    pub fn add_be24(&mut self, val: u32) {
        self.add_mem(&val.to_be_bytes()[1..]);
    }

    pub fn add_le32(&mut self, val: u32) {
        self.add_mem(&val.to_le_bytes());
    }

    pub fn add_be32(&mut self, val: u32) {
        self.add_mem(&val.to_be_bytes());
    }

    pub fn add_le48(&mut self, val: u64) {
        self.add_mem(&val.to_le_bytes()[..6]);
    }

    pub fn add_be48(&mut self, val: u64) {
        self.add_mem(&val.to_be_bytes()[2..]);
    }

    pub fn add_le64(&mut self, val: u64) {
        self.add_mem(&val.to_le_bytes());
    }

    pub fn add_be64(&mut self, val: u64) {
        self.add_mem(&val.to_be_bytes());
    }

    /// 在头部前插 `len` 字节，返回新暴露的头部区域。
    ///
    /// # Panics
    /// 头部空间不足时 panic。
    pub fn push(&mut self, len: usize) -> &mut [u8] {
        assert!(
            self.head >= len,
            "push 越界：请求 {len} 字节，头部空间 {}",
            self.head
        );
        self.head -= len;
        self.len += len;
        let head = self.head;
        &mut self.storage.as_mut()[head..head + len]
    }

    /// 复制 `mem` 到头部。
    pub fn push_mem(&mut self, mem: &[u8]) -> &mut [u8] {
        let region = self.push(mem.len());
        region.copy_from_slice(mem);
        region
    }

    pub fn push_u8(&mut self, val: u8) {
        self.push(1)[0] = val;
    }

    pub fn push_le16(&mut self, val: u16) {
        self.push_mem(&val.to_le_bytes());
    }

    pub fn push_be16(&mut self, val: u16) {
        self.push_mem(&val.to_be_bytes());
    }

    pub fn push_le24(&mut self, val: u32) {
        self.push_mem(&val.to_le_bytes()[..3]);
    }

    pub fn push_be24(&mut self, val: u32) {
        self.push_mem(&val.to_be_bytes()[1..]);
    }

    pub fn push_le32(&mut self, val: u32) {
        self.push_mem(&val.to_le_bytes());
    }

    pub fn push_be32(&mut self, val: u32) {
        self.push_mem(&val.to_be_bytes());
    }

    pub fn push_le48(&mut self, val: u64) {
        self.push_mem(&val.to_le_bytes()[..6]);
    }

    pub fn push_be48(&mut self, val: u64) {
        self.push_mem(&val.to_be_bytes()[2..]);
    }

    pub fn push_le64(&mut self, val: u64) {
        self.push_mem(&val.to_le_bytes());
    }

    pub fn push_be64(&mut self, val: u64) {
        self.push_mem(&val.to_be_bytes());
    }
}

impl<S: AsRef<[u8]>> fmt::Debug for NetBufSimple<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBufSimple")
            .field("headroom", &self.head)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// 读侧接入 `bytes` 生态：`remaining` 即有效长度，`advance` 等价于 `pull`。
impl<S: AsRef<[u8]>> Buf for NetBufSimple<S> {
    fn remaining(&self) -> usize {
        self.len
    }

    fn chunk(&self) -> &[u8] {
        self.data()
    }

    fn advance(&mut self, cnt: usize) {
        self.pull(cnt);
    }
}

// SAFETY: `chunk_mut` 只暴露尾部空间；`advance_mut` 在推进前校验不超过尾部空间，
// 因此 `len` 永远只覆盖已初始化（存储本身即为已初始化的字节）的区域。
unsafe impl<S: AsRef<[u8]> + AsMut<[u8]>> BufMut for NetBufSimple<S> {
    fn remaining_mut(&self) -> usize {
        self.tailroom()
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        self.add(cnt);
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(self.tail_mut())
    }
}
