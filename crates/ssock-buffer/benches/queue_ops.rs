use bytes::Bytes;
use criterion::{Criterion, black_box};
use ssock_buffer::{SkbArena, SkbQueue};
use std::{env, time::Duration};

/// 基准：一次发送批次的“入队 → 出队 → 释放”成本。
///
/// # 设计背景（Why）
/// - 队列链接被要求为 O(1) 且零分配；基准用于在重构链接记录后及时发现回退。
///
/// # 逻辑解析（How）
/// - 竞技场预留槽位，循环内只做链接与摘除，负载为共享的静态 `Bytes`，不触发拷贝。
fn bench_enqueue_dequeue(c: &mut Criterion) {
    let payload = Bytes::from_static(&[0u8; 1460]);
    c.bench_function("skb_queue_enqueue_dequeue_64", |b| {
        let mut arena = SkbArena::with_capacity(64);
        b.iter(|| {
            let mut queue = SkbQueue::new();
            for _ in 0..64 {
                let skb = arena.alloc(payload.clone());
                queue.enqueue_tail(&mut arena, skb);
            }
            while let Some(skb) = queue.dequeue_head(&mut arena) {
                black_box(arena.release(skb));
            }
        });
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_enqueue_dequeue(&mut criterion);
    criterion.final_summary();
}
