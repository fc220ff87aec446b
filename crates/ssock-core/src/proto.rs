//! 协议描述符：决定一个套接字由哪张钩子表、哪种上层类型管理。

use core::fmt;

use crate::{hooks::HookTable, socket::SocketId};

/// 上层协议类型标记，由上层模块自行分配取值。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoType(pub u32);

impl ProtoType {
    /// 未初始化描述符使用的类型。
    pub const UNSPEC: ProtoType = ProtoType(0);
}

/// 每个套接字独占一份的协议描述符。
///
/// # 教案式注释
/// - **意图 (Why)**：让接受到的连接无需重新注册，就能沿用监听套接字的协议行为。
/// - **契约 (What)**：
///   - 根描述符的 `listener` 为 `None`；
///   - [`ProtoDescriptor::inherit`] 产出的子描述符与父描述符共享同一张钩子表，
///     `listener` 记录父套接字，类型标记取调用方给出的值；
///   - 钩子表归注册表所有，描述符只持有共享只读引用。
/// - **注意事项 (Trade-offs)**：纯值类型，没有隐藏状态；克隆只增加钩子表的引用计数。
#[derive(Clone, Default)]
pub struct ProtoDescriptor {
    hooks: Option<HookTable>,
    listener: Option<SocketId>,
    kind: ProtoType,
}

impl ProtoDescriptor {
    /// 构造根描述符。
    pub fn new(hooks: HookTable, kind: ProtoType) -> Self {
        let mut proto = Self::default();
        proto.init(hooks, kind);
        proto
    }

    /// 就地重置为根描述符，挂上 `hooks` 与 `kind`。
    pub fn init(&mut self, hooks: HookTable, kind: ProtoType) {
        self.hooks = Some(hooks);
        self.listener = None;
        self.kind = kind;
    }

    /// 为监听套接字 `listener` 派生出的连接构造描述符。
    pub fn inherit(&self, listener: SocketId, child_kind: ProtoType) -> Self {
        Self {
            hooks: self.hooks.clone(),
            listener: Some(listener),
            kind: child_kind,
        }
    }

    pub fn hooks(&self) -> Option<&HookTable> {
        self.hooks.as_ref()
    }

    pub fn listener(&self) -> Option<SocketId> {
        self.listener
    }

    pub fn kind(&self) -> ProtoType {
        self.kind
    }

    pub fn is_root(&self) -> bool {
        self.listener.is_none()
    }

    pub fn is_initialized(&self) -> bool {
        self.hooks.is_some()
    }
}

impl fmt::Debug for ProtoDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtoDescriptor")
            .field("hooks", &self.hooks.as_ref().map(HookTable::name))
            .field("listener", &self.listener)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::RecordingHooks;

    #[test]
    fn default_descriptor_is_uninitialized_root() {
        let proto = ProtoDescriptor::default();
        assert!(proto.is_root());
        assert!(!proto.is_initialized());
        assert_eq!(proto.kind(), ProtoType::UNSPEC);
    }

    #[test]
    fn inherit_shares_table_and_takes_child_kind() {
        let table = HookTable::from_arc(RecordingHooks::new("http"));
        let listener = SocketId::from_raw(3);
        for parent_kind in [ProtoType(1), ProtoType(9)] {
            let parent = ProtoDescriptor::new(table.clone(), parent_kind);
            let child = parent.inherit(listener, ProtoType(42));
            assert!(child.hooks().is_some_and(|hooks| hooks.same_table(&table)));
            assert_eq!(child.kind(), ProtoType(42));
            assert_eq!(child.listener(), Some(listener));
            assert!(!child.is_root());
        }
    }

    #[test]
    fn init_resets_listener() {
        let table = HookTable::from_arc(RecordingHooks::new("tls"));
        let mut proto = ProtoDescriptor::new(table.clone(), ProtoType(1))
            .inherit(SocketId::from_raw(5), ProtoType(2));
        proto.init(table, ProtoType(7));
        assert!(proto.is_root());
        assert_eq!(proto.kind(), ProtoType(7));
    }
}
