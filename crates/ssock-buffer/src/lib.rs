#![deny(unsafe_code)]

//! `ssock-buffer` 提供同步套接字层使用的网络缓冲竞技场与缓冲队列。
//!
//! # 模块定位（Why）
//! - 发送批次与连接的接收累积都需要一个“不额外分配、不拷贝”的缓冲链表，
//!   链接与摘除必须是 O(1)，且同一缓冲绝不能被链接两次。
//! - 链表不使用裸指针与侵入式字段，而是竞技场 + 代际句柄：
//!   链接记录仍然“嵌入”在缓冲所在的槽位里，队列本身只保存句柄。
//!
//! # 设计概要（How）
//! - `arena` 模块实现 [`SkbArena`]：槽位保存 `bytes::Bytes` 负载与链接记录，
//!   句柄 [`SkbHandle`] 携带代际号，释放后的陈旧句柄一经使用立即 panic。
//! - `queue` 模块实现 [`SkbQueue`]：`first`/`last` 为游标枚举，`Sentinel` 即空队列哨兵，
//!   空判断直接来自游标本身，不存在可能与指针失步的布尔标记。
//!
//! # 契约说明（What）
//! - 队列不做内部同步：同一时刻只能由一个逻辑所有者修改；跨上下文共享需调用方自行加锁。
//! - 误用（摘除不属于本队列的缓冲、释放仍在队列中的缓冲）属于编程错误，直接 panic。

mod arena;
mod queue;

pub use arena::{SkbArena, SkbHandle};
pub use queue::{SkbIter, SkbQueue};
