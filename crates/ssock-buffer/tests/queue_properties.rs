//! `SkbQueue` 性质验证。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：任意 `enqueue_tail`/`enqueue_head`/`unlink`/`dequeue_head` 序列之后，
//!   队列必须满足“空判断与队首一致”“遍历恰好覆盖已链接缓冲且无重复”两条不变量。
//! - **设计手法 (How)**：以 `VecDeque<SkbHandle>` 作为影子模型，Proptest 生成随机操作序列，
//!   每一步同时驱动真实队列与模型，再逐项比对。
//! - **契约 (What)**：操作下标对当前成员数取模，保证只摘除真实在队列里的缓冲；
//!   重复入队用例刻意选择已链接缓冲，验证其为无操作。

use std::collections::{HashSet, VecDeque};

use bytes::Bytes;
use proptest::prelude::*;
use ssock_buffer::{SkbArena, SkbHandle, SkbQueue};

#[derive(Clone, Debug)]
enum Op {
    PushTail,
    PushHead,
    Requeue(usize),
    Unlink(usize),
    Dequeue,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::PushTail),
        1 => Just(Op::PushHead),
        1 => any::<usize>().prop_map(Op::Requeue),
        2 => any::<usize>().prop_map(Op::Unlink),
        2 => Just(Op::Dequeue),
    ]
}

fn assert_matches_model(
    queue: &SkbQueue,
    arena: &SkbArena,
    model: &VecDeque<SkbHandle>,
) -> Result<(), TestCaseError> {
    prop_assert_eq!(queue.is_empty(), queue.peek_head().is_none());
    prop_assert_eq!(queue.is_empty(), model.is_empty());
    prop_assert_eq!(queue.peek_head(), model.front().copied());
    prop_assert_eq!(queue.peek_tail(), model.back().copied());

    let walked: Vec<_> = queue.iter(arena).collect();
    let unique: HashSet<_> = walked.iter().copied().collect();
    prop_assert_eq!(unique.len(), walked.len(), "traversal repeated a buffer");
    prop_assert_eq!(walked, model.iter().copied().collect::<Vec<_>>());
    Ok(())
}

proptest! {
    #[test]
    fn prop_queue_tracks_fifo_model(ops in prop::collection::vec(op(), 1..64)) {
        let mut arena = SkbArena::new();
        let mut queue = SkbQueue::new();
        let mut model = VecDeque::new();
        let mut detached = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::PushTail => {
                    let skb = arena.alloc(Bytes::from(vec![step as u8; 4]));
                    prop_assert!(queue.enqueue_tail(&mut arena, skb));
                    model.push_back(skb);
                }
                Op::PushHead => {
                    let skb = arena.alloc(Bytes::from(vec![step as u8; 2]));
                    prop_assert!(queue.enqueue_head(&mut arena, skb));
                    model.push_front(skb);
                }
                Op::Requeue(pick) if !model.is_empty() => {
                    let skb = model[pick % model.len()];
                    prop_assert!(!queue.enqueue_tail(&mut arena, skb));
                }
                Op::Unlink(pick) if !model.is_empty() => {
                    let skb = model.remove(pick % model.len()).expect("index in range");
                    queue.unlink(&mut arena, skb);
                    prop_assert!(!arena.is_queued(skb));
                    detached.push(skb);
                }
                Op::Dequeue => {
                    let got = queue.dequeue_head(&mut arena);
                    prop_assert_eq!(got, model.pop_front());
                    detached.extend(got);
                }
                Op::Requeue(_) | Op::Unlink(_) => {}
            }
            assert_matches_model(&queue, &arena, &model)?;
        }

        for skb in detached {
            arena.release(skb);
        }
        prop_assert_eq!(queue.purge(&mut arena), model.len());
        prop_assert!(arena.is_empty());
    }
}
