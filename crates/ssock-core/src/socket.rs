//! 套接字句柄与状态机。

use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use std::net::SocketAddr;

use parking_lot::Mutex;

use crate::{
    error::{Result, SocketError},
    guard::CallbackGuard,
    proto::ProtoDescriptor,
};

/// 套接字在本层内的唯一标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sk#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    /// 地址是否属于本族。
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        matches!(
            (self, addr),
            (AddressFamily::Inet, SocketAddr::V4(_)) | (AddressFamily::Inet6, SocketAddr::V6(_))
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Datagram,
}

/// 套接字生命周期状态。
///
/// # 教案式注释
/// - **主干 (What)**：`Created → Bound → Listening → {Connected | Closing} → Released`；
/// - **补充状态**：`Connecting` 表示非阻塞建连尚未完成；`Closed` 表示传输层已确认终止，
///   此时才允许 `release`；`Error` 可从 `Connected`/`Listening`/`Connecting` 因致命传输错误进入；
/// - **终态**：`Released` 之后任何操作都是编程错误。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    Created,
    Bound,
    Listening,
    Connecting,
    Connected,
    Closing,
    Closed,
    Error,
    Released,
}

/// 网络栈连接对象在本层的视图。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 承载协议描述符、回调守卫与生命周期状态；句柄本身以 `Arc` 共享给控制面与投递路径。
///
/// ## 逻辑 (How)
/// - 状态由 `parking_lot::Mutex` 保护，每次迁移在锁内完成“校验 + 写入”；
/// - 新连接、终止、错误三类钩子各有一个原子“已触发”标记，保证每个套接字至多触发一次。
///
/// ## 契约 (What)
/// - `Released` 之后调用任何生命周期操作都会 panic；
/// - 描述符与钩子只在 [`CallbackGuard`] 的写锁内修改。
pub struct Socket {
    id: SocketId,
    family: AddressFamily,
    kind: SocketKind,
    protocol: u16,
    state: Mutex<SocketState>,
    callbacks: CallbackGuard,
    local_addr: Mutex<Option<SocketAddr>>,
    peer_addr: Mutex<Option<SocketAddr>>,
    new_fired: AtomicBool,
    drop_fired: AtomicBool,
    error_fired: AtomicBool,
}

impl Socket {
    pub(crate) fn new(
        id: SocketId,
        family: AddressFamily,
        kind: SocketKind,
        protocol: u16,
        state: SocketState,
    ) -> Self {
        Self {
            id,
            family,
            kind,
            protocol,
            state: Mutex::new(state),
            callbacks: CallbackGuard::new(),
            local_addr: Mutex::new(None),
            peer_addr: Mutex::new(None),
            new_fired: AtomicBool::new(false),
            drop_fired: AtomicBool::new(false),
            error_fired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    pub fn state(&self) -> SocketState {
        *self.state.lock()
    }

    /// 回调安装守卫；传输层在需要独占回调时也经由它加写锁。
    pub fn callbacks(&self) -> &CallbackGuard {
        &self.callbacks
    }

    /// 当前挂载的协议描述符（不一定已安装到投递路径）。
    pub fn proto(&self) -> ProtoDescriptor {
        self.callbacks.proto()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer_addr.lock()
    }

    pub(crate) fn set_local_addr(&self, addr: SocketAddr) {
        *self.local_addr.lock() = Some(addr);
    }

    pub(crate) fn set_peer_addr(&self, addr: SocketAddr) {
        *self.peer_addr.lock() = Some(addr);
    }

    /// 在锁内校验当前状态属于 `allowed` 并迁移到 `next`，返回迁移前的状态。
    #[track_caller]
    pub(crate) fn transition(
        &self,
        operation: &'static str,
        allowed: &[SocketState],
        next: SocketState,
    ) -> Result<SocketState> {
        let mut state = self.state.lock();
        let current = *state;
        self.ensure_live(current, operation);
        if !allowed.contains(&current) {
            return Err(SocketError::InvalidState {
                socket: self.id,
                operation,
                state: current,
            });
        }
        *state = next;
        Ok(current)
    }

    /// 只校验不迁移：当前状态必须属于 `allowed`。
    #[track_caller]
    pub(crate) fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[SocketState],
    ) -> Result<SocketState> {
        let current = self.live_state(operation);
        if allowed.contains(&current) {
            Ok(current)
        } else {
            Err(SocketError::InvalidState {
                socket: self.id,
                operation,
                state: current,
            })
        }
    }

    /// 无条件迁移（`Released` 除外），返回迁移前的状态。
    #[track_caller]
    pub(crate) fn force_state(&self, operation: &'static str, next: SocketState) -> SocketState {
        let mut state = self.state.lock();
        let current = *state;
        self.ensure_live(current, operation);
        *state = next;
        current
    }

    /// 读取状态并断言套接字尚未释放。
    #[track_caller]
    pub(crate) fn live_state(&self, operation: &'static str) -> SocketState {
        let current = *self.state.lock();
        self.ensure_live(current, operation);
        current
    }

    pub(crate) fn claim_new(&self) -> bool {
        !self.new_fired.swap(true, Ordering::AcqRel)
    }

    /// 新连接钩子是否已被认领；断开钩子只对建立过的连接触发。
    pub(crate) fn new_claimed(&self) -> bool {
        self.new_fired.load(Ordering::Acquire)
    }

    pub(crate) fn claim_drop(&self) -> bool {
        !self.drop_fired.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn claim_error(&self) -> bool {
        !self.error_fired.swap(true, Ordering::AcqRel)
    }

    #[track_caller]
    fn ensure_live(&self, state: SocketState, operation: &'static str) {
        assert!(
            state != SocketState::Released,
            "`{operation}` called on released socket {}",
            self.id
        );
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("family", &self.family)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("proto", &self.proto())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket() -> Socket {
        Socket::new(
            SocketId::from_raw(1),
            AddressFamily::Inet,
            SocketKind::Stream,
            6,
            SocketState::Created,
        )
    }

    #[test]
    fn transition_rejects_states_outside_allowed_set() {
        let sk = socket();
        let err = sk
            .transition("listen", &[SocketState::Bound], SocketState::Listening)
            .expect_err("listen from Created must be rejected");
        assert_eq!(
            err,
            SocketError::InvalidState {
                socket: sk.id(),
                operation: "listen",
                state: SocketState::Created,
            }
        );
        assert_eq!(sk.state(), SocketState::Created);
    }

    #[test]
    #[should_panic(expected = "released socket")]
    fn released_socket_panics_on_use() {
        let sk = socket();
        sk.force_state("release", SocketState::Released);
        let _ = sk.transition("bind", &[SocketState::Created], SocketState::Bound);
    }

    #[test]
    fn one_shot_claims() {
        let sk = socket();
        assert!(sk.claim_drop());
        assert!(!sk.claim_drop());
        assert!(sk.claim_error());
        assert!(!sk.claim_error());
        assert!(sk.claim_new());
        assert!(!sk.claim_new());
    }

    #[test]
    fn family_matches_address_version() {
        let v4: SocketAddr = "10.0.0.1:443".parse().expect("v4 literal");
        let v6: SocketAddr = "[::1]:443".parse().expect("v6 literal");
        assert!(AddressFamily::Inet.accepts(&v4));
        assert!(!AddressFamily::Inet.accepts(&v6));
        assert!(AddressFamily::Inet6.accepts(&v6));
    }
}
