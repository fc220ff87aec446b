//! 钩子表：上层协议模块挂到套接字上的四个回调。

use core::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::{
    proto::{ProtoDescriptor, ProtoType},
    socket::{Socket, SocketId},
};

/// 钩子执行失败时，上层希望本层采取的动作。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookFailure {
    /// 协议层拒绝该连接：发起有序关闭，终止确认后触发断开钩子。
    Drop,
    /// 不可恢复：套接字进入 `Error` 状态并触发错误钩子。
    Fatal,
}

/// 接收钩子的返回值。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvVerdict {
    /// 数据已完整消费。
    Consumed,
    /// 已消费部分数据，等待后续数据到达。
    NeedMore,
    Error(HookFailure),
}

/// 分发时交给钩子的连接视图。
///
/// 描述符来自与钩子表同一份安装快照，二者必然配套。
pub struct Connection<'a> {
    socket: &'a Socket,
    proto: &'a ProtoDescriptor,
}

impl<'a> Connection<'a> {
    pub(crate) fn new(socket: &'a Socket, proto: &'a ProtoDescriptor) -> Self {
        Self { socket, proto }
    }

    pub fn id(&self) -> SocketId {
        self.socket.id()
    }

    pub fn socket(&self) -> &'a Socket {
        self.socket
    }

    pub fn proto(&self) -> &'a ProtoDescriptor {
        self.proto
    }
}

impl fmt::Debug for Connection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("socket", &self.socket.id())
            .field("proto", self.proto)
            .finish()
    }
}

/// 上层协议模块实现的回调集合。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把“新连接 / 断开 / 错误 / 收到数据”四类事件交给上层处理，本层只负责在正确的时机、
///   以正确的次数调用它们。
///
/// ## 契约 (What)
/// - `connection_new` 与 `connection_error`、`connection_drop` 对每个套接字各至多调用一次；
///   错误钩子之后仍可能收到断开钩子，实现需把断开之后的重复通知当作无操作；
/// - `connection_recv` 收到完整缓冲与起始偏移 `off`，`off <= skb.len()`；
/// - 所有回调都在不持有本层任何锁的情况下执行，不得阻塞。
///
/// ## 注意事项 (Trade-offs)
/// - `child_type` 默认沿用父类型；需要区分监听与已接受连接的模块可重写它。
pub trait ConnectionHooks: Send + Sync + 'static {
    /// 用于日志与错误信息的名称。
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }

    /// 监听套接字派生连接时，子描述符使用的类型标记。
    fn child_type(&self, parent: ProtoType) -> ProtoType {
        parent
    }

    fn connection_new(&self, conn: &Connection<'_>) -> Result<(), HookFailure>;

    fn connection_drop(&self, conn: &Connection<'_>);

    fn connection_error(&self, conn: &Connection<'_>);

    fn connection_recv(&self, conn: &Connection<'_>, skb: &Bytes, off: usize) -> RecvVerdict;
}

/// 钩子表身份，取自共享指针地址。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HookTableId(usize);

/// 共享的钩子表引用。
///
/// 同一个 `Arc` 的所有克隆视为同一张表；注册表据此判重。
#[derive(Clone)]
pub struct HookTable {
    hooks: Arc<dyn ConnectionHooks>,
}

impl HookTable {
    pub fn new<H: ConnectionHooks>(hooks: H) -> Self {
        Self {
            hooks: Arc::new(hooks),
        }
    }

    pub fn from_arc(hooks: Arc<dyn ConnectionHooks>) -> Self {
        Self { hooks }
    }

    pub fn id(&self) -> HookTableId {
        HookTableId(Arc::as_ptr(&self.hooks) as *const () as usize)
    }

    pub fn name(&self) -> &str {
        self.hooks.name()
    }

    pub fn same_table(&self, other: &HookTable) -> bool {
        self.id() == other.id()
    }

    pub fn hooks(&self) -> &dyn ConnectionHooks {
        self.hooks.as_ref()
    }
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookTable")
            .field("name", &self.name())
            .field("id", &self.id())
            .finish()
    }
}
