//! 回调安装守卫。
//!
//! # 设计初衷（Why）
//! - 投递路径与控制面并行执行；若钩子表与描述符分两次写入，投递可能读到“新钩子 + 旧描述符”。
//! - 守卫采用“写者互斥 + 不可变快照原子替换”：
//!   投递路径无锁读取，写者之间由 `parking_lot::Mutex` 串行化。
//!
//! # 使用方式（How）
//! - 写者调用 [`CallbackGuard::write`] 取得 [`CallbackWriter`]，在其内修改挂载的描述符并发布快照；
//!   写锁随 `CallbackWriter` 析构释放。
//! - 读者调用 [`CallbackGuard::load`] 得到 `Arc<CallbackSnapshot>`，之后即可脱离守卫调用钩子。
//!
//! # 契约说明（What）
//! - 快照中的 (描述符, 钩子表) 一定成对发布，读者不会观察到撕裂的组合；
//! - 守卫按套接字划分，不存在全局锁。

use core::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, MutexGuard};

use crate::{hooks::HookTable, proto::ProtoDescriptor};

/// 已安装到投递路径上的不可变 (描述符, 钩子表) 组合。
pub struct CallbackSnapshot {
    proto: ProtoDescriptor,
    hooks: HookTable,
}

impl CallbackSnapshot {
    /// 从带钩子表的描述符构造快照；未初始化的描述符返回 `None`。
    pub fn from_proto(proto: &ProtoDescriptor) -> Option<Self> {
        let hooks = proto.hooks()?.clone();
        Some(Self {
            proto: proto.clone(),
            hooks,
        })
    }

    pub fn proto(&self) -> &ProtoDescriptor {
        &self.proto
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }
}

impl fmt::Debug for CallbackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSnapshot")
            .field("proto", &self.proto)
            .finish()
    }
}

/// 每个套接字一份的回调安装守卫。
pub struct CallbackGuard {
    attached: Mutex<ProtoDescriptor>,
    installed: ArcSwapOption<CallbackSnapshot>,
}

impl Default for CallbackGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackGuard {
    pub fn new() -> Self {
        Self {
            attached: Mutex::new(ProtoDescriptor::default()),
            installed: ArcSwapOption::empty(),
        }
    }

    /// 加写锁。
    pub fn write(&self) -> CallbackWriter<'_> {
        CallbackWriter {
            guard: self,
            attached: self.attached.lock(),
        }
    }

    /// 读路径：取得当前安装的快照。
    pub fn load(&self) -> Option<Arc<CallbackSnapshot>> {
        self.installed.load_full()
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load().is_some()
    }

    /// 当前挂载的描述符副本。
    pub fn proto(&self) -> ProtoDescriptor {
        self.attached.lock().clone()
    }
}

impl fmt::Debug for CallbackGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackGuard")
            .field("installed", &self.load())
            .finish()
    }
}

/// 持有写锁的回调写者，析构即解锁。
///
/// # 教案式注释
/// - **契约 (What)**：写锁内只做指针级别的赋值，不调用任何钩子，避免拖慢并发投递；
/// - **注意事项 (Trade-offs)**：同一线程在持有写者时再次调用 `write` 会死锁。
pub struct CallbackWriter<'a> {
    guard: &'a CallbackGuard,
    attached: MutexGuard<'a, ProtoDescriptor>,
}

impl CallbackWriter<'_> {
    /// 挂载的描述符。
    pub fn proto(&self) -> &ProtoDescriptor {
        &self.attached
    }

    /// 替换挂载的描述符；已安装的快照保持不变，直到下一次 [`CallbackWriter::publish`]。
    pub fn attach(&mut self, proto: ProtoDescriptor) {
        *self.attached = proto;
    }

    /// 把快照发布到投递路径，返回被替换的旧快照。
    pub fn publish(&mut self, snapshot: CallbackSnapshot) -> Option<Arc<CallbackSnapshot>> {
        self.guard.installed.swap(Some(Arc::new(snapshot)))
    }

    /// 当前已发布的快照。
    pub fn installed(&self) -> Option<Arc<CallbackSnapshot>> {
        self.guard.installed.load_full()
    }

    /// 把投递路径恢复为先前取得的快照（`None` 即摘下钩子），挂载的描述符保持不变。
    pub fn restore(&mut self, snapshot: Option<Arc<CallbackSnapshot>>) {
        self.guard.installed.store(snapshot);
    }

    /// 从投递路径摘下钩子，并把描述符复位为未初始化的根描述符。
    pub fn detach(&mut self) -> Option<Arc<CallbackSnapshot>> {
        *self.attached = ProtoDescriptor::default();
        self.guard.installed.swap(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{proto::ProtoType, test_stubs::RecordingHooks};

    #[test]
    fn attach_does_not_publish_until_asked() {
        let guard = CallbackGuard::new();
        let table = HookTable::from_arc(RecordingHooks::new("http"));
        let proto = ProtoDescriptor::new(table.clone(), ProtoType(1));

        let mut writer = guard.write();
        writer.attach(proto.clone());
        assert!(writer.installed().is_none());
        let snapshot = CallbackSnapshot::from_proto(writer.proto()).expect("proto carries hooks");
        assert!(writer.publish(snapshot).is_none());
        drop(writer);

        let loaded = guard.load().expect("snapshot published");
        assert!(loaded.hooks().same_table(&table));
        assert_eq!(loaded.proto().kind(), ProtoType(1));
        assert_eq!(guard.proto().kind(), ProtoType(1));
    }

    #[test]
    fn detach_clears_both_halves() {
        let guard = CallbackGuard::new();
        let table = HookTable::from_arc(RecordingHooks::new("tls"));
        let proto = ProtoDescriptor::new(table, ProtoType(2));
        {
            let mut writer = guard.write();
            writer.attach(proto.clone());
            let snapshot = CallbackSnapshot::from_proto(&proto).expect("proto carries hooks");
            writer.publish(snapshot);
        }
        let previous = guard.write().detach();
        assert!(previous.is_some());
        assert!(!guard.is_installed());
        assert!(!guard.proto().is_initialized());
    }

    #[test]
    fn restore_rolls_back_publication_only() {
        let guard = CallbackGuard::new();
        let table = HookTable::from_arc(RecordingHooks::new("http"));
        let proto = ProtoDescriptor::new(table, ProtoType(1));

        let mut writer = guard.write();
        writer.attach(proto.clone());
        let previous = writer.installed();
        let snapshot = CallbackSnapshot::from_proto(&proto).expect("proto carries hooks");
        writer.publish(snapshot);
        writer.restore(previous);
        drop(writer);

        assert!(!guard.is_installed());
        assert_eq!(guard.proto().kind(), ProtoType(1));
    }

    #[test]
    fn uninitialized_proto_has_no_snapshot() {
        assert!(CallbackSnapshot::from_proto(&ProtoDescriptor::default()).is_none());
    }
}
