use core::fmt;

use bytes::Bytes;

/// 指向竞技场槽位的稳定句柄。
///
/// # 教案式注释
/// - **意图 (Why)**：以句柄代替裸指针；句柄可复制、可比较，且不借用竞技场。
/// - **契约 (What)**：`generation` 与槽位当前代际不一致时视为陈旧句柄，
///   任何使用都会触发 panic，从而把“释放后继续使用”暴露为编程错误。
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SkbHandle {
    index: u32,
    generation: u32,
}

impl SkbHandle {
    /// 槽位下标，仅用于诊断输出。
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Debug for SkbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skb#{}v{}", self.index, self.generation)
    }
}

/// 队列身份，用于确认链接记录归属。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QueueId(pub(crate) u64);

/// 链接游标：要么指向某个缓冲，要么落在队列哨兵上。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Cursor {
    Sentinel,
    Skb(SkbHandle),
}

/// 内嵌在槽位中的链接记录。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum Link {
    #[default]
    Unlinked,
    Linked {
        queue: QueueId,
        prev: Cursor,
        next: Cursor,
    },
}

struct Entry {
    payload: Bytes,
    link: Link,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// `SkbArena` 持有所有在途网络缓冲及其链接记录。
///
/// # 模块角色（Why）
/// - 缓冲在任一时刻只归属接收路径、某个队列或发送路径之一；竞技场是它们共同的存放处，
///   队列只借用槽位里的链接字段，因此链接/摘除不会产生任何节点分配。
///
/// # 核心机制（How）
/// - 槽位向量 + 空闲下标栈；释放时递增代际号，使旧句柄失效；
/// - 负载为 `bytes::Bytes`，交给发送路径时只克隆引用计数，不复制数据。
///
/// # 契约说明（What）
/// - `alloc` 只在缓冲进入本层时调用（接收或上层构造），可能扩容槽位向量；
/// - `release` 要求缓冲已摘除，否则 panic，以免队列里留下悬挂链接。
#[derive(Default)]
pub struct SkbArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl SkbArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预留 `capacity` 个槽位，避免热路径上的扩容。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    /// 接管一段负载，返回处于“未链接”状态的句柄。
    pub fn alloc(&mut self, payload: Bytes) -> SkbHandle {
        let entry = Entry {
            payload,
            link: Link::Unlinked,
        };
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return SkbHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.slots.len()).expect("skb arena exhausted u32 index space");
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        SkbHandle {
            index,
            generation: 0,
        }
    }

    /// 读取负载。
    #[track_caller]
    pub fn payload(&self, skb: SkbHandle) -> &Bytes {
        &self.entry(skb).payload
    }

    /// “是否已入队”谓词，由链接记录推导。
    #[track_caller]
    pub fn is_queued(&self, skb: SkbHandle) -> bool {
        matches!(self.entry(skb).link, Link::Linked { .. })
    }

    /// 句柄是否仍指向存活的缓冲。
    pub fn contains(&self, skb: SkbHandle) -> bool {
        self.slots
            .get(skb.index as usize)
            .is_some_and(|slot| slot.generation == skb.generation && slot.entry.is_some())
    }

    /// 交还缓冲所有权（例如交给发送路径或直接丢弃）。
    ///
    /// # Panics
    /// 缓冲仍链接在某个队列中，或句柄已陈旧。
    #[track_caller]
    pub fn release(&mut self, skb: SkbHandle) -> Bytes {
        let slot = self.slot_mut(skb);
        let linked = matches!(
            slot.entry.as_ref().map(|entry| entry.link),
            Some(Link::Linked { .. })
        );
        assert!(!linked, "{skb:?} released while still linked into a queue");
        let entry = slot.entry.take().expect("slot validated as occupied");
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(skb.index);
        self.live -= 1;
        entry.payload
    }

    /// 存活缓冲数量。
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[track_caller]
    pub(crate) fn link(&self, skb: SkbHandle) -> Link {
        self.entry(skb).link
    }

    #[track_caller]
    pub(crate) fn set_link(&mut self, skb: SkbHandle, link: Link) {
        self.entry_mut(skb).link = link;
    }

    #[track_caller]
    pub(crate) fn set_next(&mut self, skb: SkbHandle, cursor: Cursor) {
        match &mut self.entry_mut(skb).link {
            Link::Linked { next, .. } => *next = cursor,
            Link::Unlinked => panic!("{skb:?} is not linked; cannot rewrite its successor"),
        }
    }

    #[track_caller]
    pub(crate) fn set_prev(&mut self, skb: SkbHandle, cursor: Cursor) {
        match &mut self.entry_mut(skb).link {
            Link::Linked { prev, .. } => *prev = cursor,
            Link::Unlinked => panic!("{skb:?} is not linked; cannot rewrite its predecessor"),
        }
    }

    #[track_caller]
    fn entry(&self, skb: SkbHandle) -> &Entry {
        self.slots
            .get(skb.index as usize)
            .filter(|slot| slot.generation == skb.generation)
            .and_then(|slot| slot.entry.as_ref())
            .unwrap_or_else(|| panic!("stale or foreign skb handle {skb:?}"))
    }

    #[track_caller]
    fn entry_mut(&mut self, skb: SkbHandle) -> &mut Entry {
        self.slot_mut(skb)
            .entry
            .as_mut()
            .expect("slot validated as occupied")
    }

    #[track_caller]
    fn slot_mut(&mut self, skb: SkbHandle) -> &mut Slot {
        match self.slots.get_mut(skb.index as usize) {
            Some(slot) if slot.generation == skb.generation && slot.entry.is_some() => slot,
            _ => panic!("stale or foreign skb handle {skb:?}"),
        }
    }
}

impl fmt::Debug for SkbArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkbArena")
            .field("slots", &self.slots.len())
            .field("live", &self.live)
            .finish()
    }
}
