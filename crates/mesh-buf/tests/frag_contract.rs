//! `frag_contract` 集成测试：分片链的所有权、摘除、线性化与批量队列契约。
//!
//! # 测试目标（Why）
//! - 链头计数归零时整条链按链序销毁；链头仍被引用时链保持完整；
//! - `frag_del`、`skip`、`append_bytes` 在链上移动所有权时不泄漏也不重复释放。

use std::sync::{Arc, Mutex};

use mesh_buf::{NET_BUF_FRAGS, NetBuf, NetBufList, NetBufPool, ReleasedBuf, Timeout};

/// 记录销毁顺序的池。
fn recording_pool(count: usize, data_size: usize) -> (NetBufPool, Arc<Mutex<Vec<usize>>>) {
    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&order);
    let pool = NetBufPool::builder("frag")
        .buf_count(count)
        .data_size(data_size)
        .destroy_hook(move |released: ReleasedBuf| {
            sink.lock().expect("记录销毁").push(released.id());
        })
        .build()
        .expect("配置合法");
    (pool, order)
}

fn filled(pool: &NetBufPool, payload: &[u8]) -> NetBuf {
    let buf = pool.alloc(Timeout::NoWait).expect("分配");
    buf.add_mem(payload);
    buf
}

/// 构建 `A -> B -> C`，三者计数均为 1。
fn chain_abc(pool: &NetBufPool) -> (NetBuf, [usize; 3]) {
    let a = filled(pool, b"AA");
    let b = filled(pool, b"BBB");
    let c = filled(pool, b"C");
    let ids = [a.id(), b.id(), c.id()];
    b.frag_insert(c);
    a.frag_insert(b);
    (a, ids)
}

#[test]
fn unref_head_frees_chain_in_order() {
    let (pool, order) = recording_pool(3, 8);
    let (a, ids) = chain_abc(&pool);
    assert_eq!(pool.uninit_count(), 0);
    a.unref();
    assert_eq!(*order.lock().expect("读取"), ids.to_vec());
    assert_eq!(pool.uninit_count(), 3);
}

#[test]
fn extra_ref_on_head_keeps_chain_alive() {
    let (pool, order) = recording_pool(3, 8);
    let (a, ids) = chain_abc(&pool);
    let keep = a.add_ref();
    a.unref();
    assert!(order.lock().expect("读取").is_empty());
    assert_eq!(keep.frags_len(), 6);
    let members: Vec<usize> = keep.chain().map(|member| member.id()).collect();
    assert_eq!(members, ids.to_vec());
    drop(keep);
    assert_eq!(*order.lock().expect("读取"), ids.to_vec());
}

/// 中间分片被外部引用时，释放在该分片处停止，其余部分随后续释放归还。
#[test]
fn shared_middle_fragment_survives_head_release() {
    let (pool, order) = recording_pool(3, 8);
    let (a, ids) = chain_abc(&pool);
    let middle = a.frags().expect("B");
    drop(a);
    assert_eq!(*order.lock().expect("读取"), vec![ids[0]]);
    assert_eq!(middle.frags_len(), 4);
    drop(middle);
    assert_eq!(*order.lock().expect("读取"), ids.to_vec());
}

#[test]
fn frag_add_appends_at_tail() {
    let pool = NetBufPool::new("frag-add", 3, 8, 0, None);
    let head = NetBuf::frag_add(None, filled(&pool, b"1"));
    let head = NetBuf::frag_add(Some(head), filled(&pool, b"2"));
    let head = NetBuf::frag_add(Some(head), filled(&pool, b"3"));
    assert_eq!(head.frag_last().to_vec(), b"3");
    let mut flat = [0u8; 3];
    assert_eq!(head.linearize(&mut flat, 0, 3), 3);
    assert_eq!(&flat, b"123");
}

#[test]
fn frag_del_with_parent_relinks_and_frees() {
    let (pool, order) = recording_pool(3, 8);
    let (a, ids) = chain_abc(&pool);
    let b = a.frags().expect("B");
    let next = NetBuf::frag_del(Some(&a), b).expect("C");
    assert_eq!(next.id(), ids[2]);
    assert_eq!(*order.lock().expect("读取"), vec![ids[1]]);
    assert!(a.frags().expect("A 的新后继").same_buf(&next));
    assert_eq!(next.ref_count(), 2, "链接一份，返回值一份");
    drop(next);
    assert_eq!(a.frags_len(), 3);
}

#[test]
fn frag_del_without_parent_hands_over_the_tail() {
    let (pool, order) = recording_pool(3, 8);
    let (a, ids) = chain_abc(&pool);
    let rest = NetBuf::frag_del(None, a).expect("B");
    assert_eq!(*order.lock().expect("读取"), vec![ids[0]]);
    assert_eq!(rest.id(), ids[1]);
    assert_eq!(rest.ref_count(), 1);
    assert_eq!(rest.frags_len(), 4);
}

#[test]
#[should_panic(expected = "frag_del")]
fn frag_del_rejects_foreign_parent() {
    let pool = NetBufPool::new("frag-del", 3, 8, 0, None);
    let parent = filled(&pool, b"p");
    let stranger = filled(&pool, b"s");
    let _ = NetBuf::frag_del(Some(&parent), stranger);
}

/// 把已在链中更深处的成员再次插到链头之后会形成环，必须在修改链接前被拒绝。
#[test]
#[should_panic(expected = "成环")]
fn insert_rejects_member_deeper_in_chain() {
    let (pool, _order) = recording_pool(3, 8);
    let (a, _ids) = chain_abc(&pool);
    let c = a.frag_last();
    a.frag_insert(c);
}

/// 反方向：把链头插到自己的后继之后。
#[test]
#[should_panic(expected = "成环")]
fn insert_rejects_head_behind_its_own_fragment() {
    let (pool, _order) = recording_pool(3, 8);
    let (a, _ids) = chain_abc(&pool);
    let b = a.frags().expect("B");
    b.frag_insert(a.clone());
}

#[test]
fn rejected_insert_leaves_chain_intact() {
    let (pool, order) = recording_pool(3, 8);
    let (a, ids) = chain_abc(&pool);
    let b = a.frags().expect("B");
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        a.frag_insert(b.clone());
    }));
    assert!(outcome.is_err());

    let members: Vec<usize> = a.chain().map(|member| member.id()).collect();
    assert_eq!(members, ids.to_vec());
    assert_eq!(a.frags_len(), 6);
    drop(b);
    a.unref();
    assert_eq!(*order.lock().expect("读取"), ids.to_vec());
    assert_eq!(pool.uninit_count(), 3);
}

#[test]
fn linearize_honours_offset_and_short_destination() {
    let pool = NetBufPool::new("linearize", 3, 8, 0, None);
    let (head, _) = chain_abc(&pool);

    let mut dst = [0u8; 4];
    assert_eq!(head.linearize(&mut dst, 1, 10), 4);
    assert_eq!(&dst, b"ABBB");

    let mut tail = [0u8; 8];
    assert_eq!(head.linearize(&mut tail, 4, 8), 2);
    assert_eq!(&tail[..2], b"BC");

    assert_eq!(head.linearize(&mut tail, 6, 8), 0);
}

#[test]
fn append_bytes_grows_chain_until_allocator_fails() {
    let pool = NetBufPool::new("append", 3, 4, 0, None);
    let head = filled(&pool, b"ab");
    let appended = head.append_bytes(b"cdefghijklmn", Timeout::NoWait, |timeout| {
        pool.alloc(timeout)
    });
    assert_eq!(appended, 10, "2 + 4 + 4 字节后池耗尽");
    assert_eq!(head.frags_len(), 12);
    let mut flat = [0u8; 12];
    head.linearize(&mut flat, 0, 12);
    assert_eq!(&flat, b"abcdefghijkl");
}

#[test]
fn append_bytes_fits_in_tail_without_allocating() {
    let pool = NetBufPool::new("append-fit", 2, 8, 0, None);
    let head = filled(&pool, b"ab");
    let appended = head.append_bytes(b"cd", Timeout::NoWait, |_| {
        panic!("尾部空间足够时不应申请新分片")
    });
    assert_eq!(appended, 2);
    assert_eq!(head.to_vec(), b"abcd");
}

#[test]
fn skip_consumes_across_fragments() {
    let (pool, order) = recording_pool(3, 8);
    let (a, ids) = chain_abc(&pool);
    let rest = NetBuf::skip(a, 3).expect("剩余链");
    assert_eq!(rest.id(), ids[1]);
    assert_eq!(rest.to_vec(), b"BB");
    assert_eq!(*order.lock().expect("读取"), vec![ids[0]]);

    assert!(NetBuf::skip(rest, 3).is_none());
    assert_eq!(pool.uninit_count(), 3);
}

#[test]
fn list_round_trips_chains_in_fifo_order() {
    let pool = NetBufPool::new("list", 4, 8, 0, None);
    let (chain, ids) = chain_abc(&pool);
    let single = filled(&pool, b"S");
    let single_id = single.id();

    let list = NetBufList::new();
    list.put(chain);
    list.put(single);
    assert_eq!(list.len(), 4);

    let chain = list.get().expect("链");
    let members: Vec<NetBuf> = chain.chain().collect();
    assert_eq!(members.iter().map(NetBuf::id).collect::<Vec<_>>(), ids.to_vec());
    assert!(members.iter().all(|member| member.flags() & NET_BUF_FRAGS == 0));
    drop(members);

    let single = list.get().expect("单缓冲");
    assert_eq!(single.id(), single_id);
    assert!(list.is_empty());
    assert!(list.get().is_none());
}
