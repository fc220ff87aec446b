//! # HookRegistry：钩子表注册表
//!
//! ## 核心意图（Why）
//! - 上层协议模块在初始化时登记钩子表、在卸载时注销；本层只把已登记的表安装到套接字上，
//!   防止已卸载模块的回调继续挂在投递路径上。
//! - 注册表不是进程级全局状态，而是由 [`SocketLayer`](crate::SocketLayer) 持有的显式对象，
//!   初始化与清理跟随顶层上下文的生命周期。
//!
//! ## 行为契约（What）
//! - `register`：同一张表重复登记返回 `AlreadyRegistered`，超出容量返回 `RegistryFull`；
//! - `unregister`：表不存在返回 `NotFound`；调用方必须先把表从仍在使用它的套接字上摘下，
//!   注册表不维护反向引用；
//! - `install`：在套接字的回调写锁内，把挂载描述符的钩子表发布到投递路径。
//!
//! ## 风险提示（Trade-offs）
//! - 登记/注销只在模块初始化与卸载时发生，由调用方串行化；容量检查与插入之间不额外加锁。

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::debug;

use crate::{
    error::{Result, SocketError},
    guard::{CallbackSnapshot, CallbackWriter},
    hooks::{HookTable, HookTableId},
    socket::{Socket, SocketId},
};

#[derive(Debug)]
pub struct HookRegistry {
    tables: DashMap<HookTableId, HookTable>,
    capacity: usize,
}

impl HookRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            tables: DashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn register(&self, hooks: &HookTable) -> Result<()> {
        if self.tables.len() >= self.capacity && !self.is_registered(hooks) {
            return Err(SocketError::RegistryFull {
                capacity: self.capacity,
            });
        }
        match self.tables.entry(hooks.id()) {
            Entry::Occupied(_) => Err(SocketError::AlreadyRegistered {
                table: hooks.name().to_owned(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(hooks.clone());
                debug!(table = hooks.name(), "hook table registered");
                Ok(())
            }
        }
    }

    pub fn unregister(&self, hooks: &HookTable) -> Result<()> {
        match self.tables.remove(&hooks.id()) {
            Some(_) => {
                debug!(table = hooks.name(), "hook table unregistered");
                Ok(())
            }
            None => Err(SocketError::NotFound {
                table: hooks.name().to_owned(),
            }),
        }
    }

    pub fn is_registered(&self, hooks: &HookTable) -> bool {
        self.tables.contains_key(&hooks.id())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 加写锁并安装套接字当前挂载的描述符。
    pub fn install(&self, socket: &Socket) -> Result<()> {
        let mut writer = socket.callbacks().write();
        self.install_locked(socket.id(), &mut writer)
    }

    /// 在调用方已持有的写锁内安装。
    pub(crate) fn install_locked(
        &self,
        socket: SocketId,
        writer: &mut CallbackWriter<'_>,
    ) -> Result<()> {
        let snapshot = CallbackSnapshot::from_proto(writer.proto())
            .ok_or(SocketError::MissingProto { socket })?;
        if !self.is_registered(snapshot.hooks()) {
            return Err(SocketError::NotFound {
                table: snapshot.hooks().name().to_owned(),
            });
        }
        debug!(
            socket = %socket,
            table = snapshot.hooks().name(),
            kind = snapshot.proto().kind().0,
            "callbacks installed"
        );
        writer.publish(snapshot);
        Ok(())
    }

    /// 清空注册表，返回被移除的表数量。
    pub fn clear(&self) -> usize {
        let removed = self.tables.len();
        self.tables.clear();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        proto::{ProtoDescriptor, ProtoType},
        socket::{AddressFamily, SocketKind, SocketState},
        test_stubs::RecordingHooks,
    };

    #[test]
    fn double_register_is_rejected() {
        let registry = HookRegistry::new(4);
        let table = HookTable::from_arc(RecordingHooks::new("http"));
        registry.register(&table).expect("first registration");
        assert_eq!(
            registry.register(&table),
            Err(SocketError::AlreadyRegistered {
                table: "http".into()
            })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_unknown_is_not_found() {
        let registry = HookRegistry::new(4);
        let table = HookTable::from_arc(RecordingHooks::new("tls"));
        assert_eq!(
            registry.unregister(&table),
            Err(SocketError::NotFound { table: "tls".into() })
        );
        registry.register(&table).expect("register");
        registry.unregister(&table).expect("unregister");
        assert!(registry.is_empty());
    }

    #[test]
    fn capacity_is_enforced() {
        let registry = HookRegistry::new(1);
        let first = HookTable::from_arc(RecordingHooks::new("a"));
        let second = HookTable::from_arc(RecordingHooks::new("b"));
        registry.register(&first).expect("fits");
        assert_eq!(
            registry.register(&second),
            Err(SocketError::RegistryFull { capacity: 1 })
        );
        assert!(matches!(
            registry.register(&first),
            Err(SocketError::AlreadyRegistered { .. })
        ));
    }

    #[test]
    fn install_requires_registered_hooks() {
        let registry = HookRegistry::new(2);
        let table = HookTable::from_arc(RecordingHooks::new("http"));
        let socket = Socket::new(
            SocketId::from_raw(11),
            AddressFamily::Inet,
            SocketKind::Stream,
            6,
            SocketState::Created,
        );

        assert_eq!(
            registry.install(&socket),
            Err(SocketError::MissingProto {
                socket: socket.id()
            })
        );

        socket
            .callbacks()
            .write()
            .attach(ProtoDescriptor::new(table.clone(), ProtoType(1)));
        assert!(matches!(
            registry.install(&socket),
            Err(SocketError::NotFound { .. })
        ));

        registry.register(&table).expect("register");
        registry.install(&socket).expect("install");
        assert!(socket.callbacks().is_installed());
        assert_eq!(registry.clear(), 1);
    }
}
