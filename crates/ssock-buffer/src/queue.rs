use core::sync::atomic::{AtomicU64, Ordering};

use tracing::{trace, warn};

use crate::arena::{Cursor, Link, QueueId, SkbArena, SkbHandle};

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// `SkbQueue` 是按 FIFO 组织的双向循环缓冲链表。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 为发送批次、连接接收累积提供零分配的缓冲队列：链接字段存放在竞技场槽位中，
///   队列对象只保存首尾游标。
///
/// ## 逻辑 (How)
/// - 空队列时 `first == last == Cursor::Sentinel`，哨兵即队列自身；
/// - 每个缓冲的 `prev`/`next` 要么指向邻居，要么指向哨兵，因此首尾更新无需空指针特判；
/// - 链接记录里带有队列身份，摘除时可以断言缓冲确实属于本队列。
///
/// ## 契约 (What)
/// - 所有操作均为 O(1)（`len`/`iter`/`purge` 除外，它们是遍历）；
/// - `enqueue_tail`/`enqueue_head` 遇到已入队缓冲时静默返回 `false`；
/// - 摘除不属于本队列的缓冲会 panic；
/// - 队列不做内部同步，需由单一所有者持有 `&mut`。
///
/// ## 注意事项 (Trade-offs)
/// - 析构时无法归还缓冲（不持有竞技场），因此非空析构只记录告警；
///   残留缓冲仍标记为已入队，占住竞技场槽位且无法再 `release`，直到竞技场本身被丢弃。
///   [`SkbQueue::purge`] 是唯一的拆除路径，所有者必须在丢弃队列前调用它。
#[derive(Debug)]
pub struct SkbQueue {
    id: QueueId,
    first: Cursor,
    last: Cursor,
}

impl Default for SkbQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SkbQueue {
    /// 构造空队列，首尾均指向哨兵。
    pub fn new() -> Self {
        Self {
            id: QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed)),
            first: Cursor::Sentinel,
            last: Cursor::Sentinel,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first == Cursor::Sentinel
    }

    /// 将缓冲追加到队尾。
    ///
    /// 返回 `false` 表示缓冲已链接在某个队列中，本次调用未做任何修改；
    /// 重试路径重复提交同一缓冲时依赖这一点保持链表完整。
    #[track_caller]
    pub fn enqueue_tail(&mut self, arena: &mut SkbArena, skb: SkbHandle) -> bool {
        if arena.is_queued(skb) {
            trace!(?skb, "skb already queued; enqueue_tail ignored");
            return false;
        }
        let prev = self.last;
        arena.set_link(
            skb,
            Link::Linked {
                queue: self.id,
                prev,
                next: Cursor::Sentinel,
            },
        );
        match prev {
            Cursor::Sentinel => self.first = Cursor::Skb(skb),
            Cursor::Skb(tail) => arena.set_next(tail, Cursor::Skb(skb)),
        }
        self.last = Cursor::Skb(skb);
        true
    }

    /// 将缓冲插入队首，供发送路径把被拒绝的缓冲放回原位。
    #[track_caller]
    pub fn enqueue_head(&mut self, arena: &mut SkbArena, skb: SkbHandle) -> bool {
        if arena.is_queued(skb) {
            trace!(?skb, "skb already queued; enqueue_head ignored");
            return false;
        }
        let next = self.first;
        arena.set_link(
            skb,
            Link::Linked {
                queue: self.id,
                prev: Cursor::Sentinel,
                next,
            },
        );
        match next {
            Cursor::Sentinel => self.last = Cursor::Skb(skb),
            Cursor::Skb(head) => arena.set_prev(head, Cursor::Skb(skb)),
        }
        self.first = Cursor::Skb(skb);
        true
    }

    /// 从队列任意位置摘除缓冲，并清空其链接记录。
    ///
    /// # Panics
    /// 缓冲未链接，或链接在另一个队列中。
    #[track_caller]
    pub fn unlink(&mut self, arena: &mut SkbArena, skb: SkbHandle) {
        let (prev, next) = self.members_link(arena, skb);
        match next {
            Cursor::Sentinel => self.last = prev,
            Cursor::Skb(succ) => arena.set_prev(succ, prev),
        }
        match prev {
            Cursor::Sentinel => self.first = next,
            Cursor::Skb(pred) => arena.set_next(pred, next),
        }
        arena.set_link(skb, Link::Unlinked);
    }

    /// 返回 `skb` 的后继；落在哨兵上时为 `None`。
    #[track_caller]
    pub fn next(&self, arena: &SkbArena, skb: SkbHandle) -> Option<SkbHandle> {
        match self.members_link(arena, skb).1 {
            Cursor::Sentinel => None,
            Cursor::Skb(next) => Some(next),
        }
    }

    pub fn peek_head(&self) -> Option<SkbHandle> {
        match self.first {
            Cursor::Sentinel => None,
            Cursor::Skb(skb) => Some(skb),
        }
    }

    pub fn peek_tail(&self) -> Option<SkbHandle> {
        match self.last {
            Cursor::Sentinel => None,
            Cursor::Skb(skb) => Some(skb),
        }
    }

    pub fn dequeue_head(&mut self, arena: &mut SkbArena) -> Option<SkbHandle> {
        let skb = self.peek_head()?;
        self.unlink(arena, skb);
        Some(skb)
    }

    /// 自队首到队尾的遍历器。
    pub fn iter<'a>(&'a self, arena: &'a SkbArena) -> SkbIter<'a> {
        SkbIter {
            queue: self,
            arena,
            cursor: self.first,
        }
    }

    /// 队列长度；需要遍历，仅用于诊断与断言。
    pub fn len(&self, arena: &SkbArena) -> usize {
        self.iter(arena).count()
    }

    /// 摘除并释放全部剩余缓冲，返回释放数量。
    pub fn purge(&mut self, arena: &mut SkbArena) -> usize {
        let mut released = 0;
        while let Some(skb) = self.dequeue_head(arena) {
            arena.release(skb);
            released += 1;
        }
        released
    }

    #[track_caller]
    fn members_link(&self, arena: &SkbArena, skb: SkbHandle) -> (Cursor, Cursor) {
        match arena.link(skb) {
            Link::Linked { queue, prev, next } if queue == self.id => (prev, next),
            Link::Linked { .. } => panic!("{skb:?} is linked into a different queue"),
            Link::Unlinked => panic!("{skb:?} is not linked into any queue"),
        }
    }
}

impl Drop for SkbQueue {
    fn drop(&mut self) {
        if !self.is_empty() && !std::thread::panicking() {
            warn!(
                queue = self.id.0,
                "skb queue dropped with linked buffers; they stay pinned in the arena"
            );
        }
    }
}

/// [`SkbQueue::iter`] 返回的遍历器。
pub struct SkbIter<'a> {
    queue: &'a SkbQueue,
    arena: &'a SkbArena,
    cursor: Cursor,
}

impl Iterator for SkbIter<'_> {
    type Item = SkbHandle;

    fn next(&mut self) -> Option<SkbHandle> {
        match self.cursor {
            Cursor::Sentinel => None,
            Cursor::Skb(skb) => {
                self.cursor = match self.queue.next(self.arena, skb) {
                    Some(next) => Cursor::Skb(next),
                    None => Cursor::Sentinel,
                };
                Some(skb)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn filled(arena: &mut SkbArena, labels: &[&'static str]) -> (SkbQueue, Vec<SkbHandle>) {
        let mut queue = SkbQueue::new();
        let handles: Vec<_> = labels
            .iter()
            .map(|label| arena.alloc(Bytes::from_static(label.as_bytes())))
            .collect();
        for skb in &handles {
            assert!(queue.enqueue_tail(arena, *skb));
        }
        (queue, handles)
    }

    #[test]
    fn dequeue_then_unlink_tail_leaves_middle() {
        let mut arena = SkbArena::new();
        let (mut queue, h) = filled(&mut arena, &["A", "B", "C"]);

        assert_eq!(queue.dequeue_head(&mut arena), Some(h[0]));
        assert_eq!(queue.iter(&arena).collect::<Vec<_>>(), vec![h[1], h[2]]);

        queue.unlink(&mut arena, h[2]);
        assert_eq!(queue.iter(&arena).collect::<Vec<_>>(), vec![h[1]]);
        assert_eq!(queue.peek_tail(), Some(h[1]));
        assert_eq!(queue.peek_head(), Some(h[1]));
        assert_eq!(queue.purge(&mut arena), 1);
    }

    #[test]
    fn re_enqueue_is_a_noop() {
        let mut arena = SkbArena::new();
        let (mut queue, h) = filled(&mut arena, &["A", "B"]);
        assert!(!queue.enqueue_tail(&mut arena, h[0]));
        assert!(!queue.enqueue_head(&mut arena, h[1]));
        assert_eq!(queue.iter(&arena).collect::<Vec<_>>(), h);
        queue.purge(&mut arena);
    }

    #[test]
    fn enqueue_head_on_empty_sets_both_ends() {
        let mut arena = SkbArena::new();
        let mut queue = SkbQueue::new();
        let skb = arena.alloc(Bytes::from_static(b"x"));
        assert!(queue.enqueue_head(&mut arena, skb));
        assert_eq!(queue.peek_head(), Some(skb));
        assert_eq!(queue.peek_tail(), Some(skb));
        assert_eq!(queue.next(&arena, skb), None);
        queue.unlink(&mut arena, skb);
        assert!(queue.is_empty());
        assert!(!arena.is_queued(skb));
    }

    #[test]
    #[should_panic(expected = "different queue")]
    fn unlink_from_foreign_queue_panics() {
        let mut arena = SkbArena::new();
        let (mut owner, h) = filled(&mut arena, &["A"]);
        let mut other = SkbQueue::new();
        other.unlink(&mut arena, h[0]);
        owner.purge(&mut arena);
    }

    #[test]
    #[should_panic(expected = "not linked")]
    fn double_unlink_panics() {
        let mut arena = SkbArena::new();
        let (mut queue, h) = filled(&mut arena, &["A"]);
        queue.unlink(&mut arena, h[0]);
        queue.unlink(&mut arena, h[0]);
    }

    #[test]
    #[should_panic(expected = "still linked")]
    fn releasing_linked_buffer_panics() {
        let mut arena = SkbArena::new();
        let (_queue, h) = filled(&mut arena, &["A"]);
        arena.release(h[0]);
    }

    #[test]
    fn dropped_queue_keeps_buffers_pinned() {
        let mut arena = SkbArena::new();
        let (queue, h) = filled(&mut arena, &["A", "B"]);
        drop(queue);

        assert_eq!(arena.live(), 2);
        assert!(h.iter().all(|skb| arena.contains(*skb) && arena.is_queued(*skb)));

        let mut fresh = SkbQueue::new();
        assert!(!fresh.enqueue_tail(&mut arena, h[0]));
        assert!(fresh.is_empty());
    }

    #[test]
    #[should_panic(expected = "still linked")]
    fn buffer_left_in_dropped_queue_cannot_be_released() {
        let mut arena = SkbArena::new();
        let (queue, h) = filled(&mut arena, &["A"]);
        drop(queue);
        arena.release(h[0]);
    }
}
