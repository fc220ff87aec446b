//! 内存传输层与记录型钩子表。
//!
//! # 设计定位（Why）
//! - 生命周期、分发与守卫的测试都需要一个可控的网络栈和一个能回放调用序列的上层模块；
//!   过去在每个测试文件里各写一份，接口调整时容易漏改。
//! - 统一出口后，测试直接 `use ssock_core::test_stubs::{MemoryTransport, RecordingHooks};`。
//!
//! # 契约说明（What）
//! - [`MemoryTransport`] 只在内存里维护端口表与发送记录，不触碰真实网络；
//! - [`RecordingHooks`] 按调用顺序记录每一次钩子回调，返回值可在测试中调整。
//!
//! # 风险与权衡（Trade-offs）
//! - 桩实现使用互斥锁记录事件，适合功能测试与压力测试，不适合作为性能基线。

use std::{
    collections::{HashMap, HashSet},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    string::String,
    sync::Arc,
    vec::Vec,
};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    hooks::{Connection, ConnectionHooks, HookFailure, RecvVerdict},
    proto::ProtoType,
    socket::{AddressFamily, SocketId, SocketKind},
    transport::{ConnectFlags, ConnectProgress, Transport, TransportError},
};

/// [`MemoryTransport`] 记录下的网络栈调用。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportCall {
    Open(SocketId),
    Bind(SocketId, SocketAddr),
    Listen(SocketId, u32),
    Connect(SocketId, SocketAddr, ConnectFlags),
    Transmit(SocketId, usize),
    Shutdown(SocketId),
    Release(SocketId),
}

#[derive(Default)]
struct MemoryState {
    bound: HashMap<SocketAddr, SocketId>,
    next_port: u16,
    listeners: HashSet<SocketId>,
    transmit_credit: Option<usize>,
    fail_next_transmit: Option<TransportError>,
    partial_transmit: bool,
    fail_next_listen: Option<TransportError>,
    connect_progress: Option<ConnectProgress>,
    refuse_connect: Option<TransportError>,
    transmitted: HashMap<SocketId, Vec<Bytes>>,
    calls: Vec<TransportCall>,
}

/// 在内存中模拟网络栈的传输层。
///
/// # 使用方式（How）
/// - `set_transmit_credit(Some(n))`：之后只接受 `n` 个缓冲，再多则返回 `WouldBlock`；`None` 表示不限；
/// - `fail_next_transmit`：下一次发送返回给定错误；
/// - `set_partial_transmit(true)`：每次发送只报告接受了一半字节，模拟违反“整块接受”约定的网络栈；
/// - `fail_next_listen`：下一次 `listen` 返回给定错误；
/// - `set_connect_progress`：控制 `connect` 的即时答复，默认 `Established`；
/// - 端口 0 的绑定会分配 `40000` 起的临时端口。
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_transmit_credit(&self, credit: Option<usize>) {
        self.state.lock().transmit_credit = credit;
    }

    pub fn fail_next_transmit(&self, err: TransportError) {
        self.state.lock().fail_next_transmit = Some(err);
    }

    pub fn set_partial_transmit(&self, partial: bool) {
        self.state.lock().partial_transmit = partial;
    }

    pub fn fail_next_listen(&self, err: TransportError) {
        self.state.lock().fail_next_listen = Some(err);
    }

    pub fn set_connect_progress(&self, progress: ConnectProgress) {
        self.state.lock().connect_progress = Some(progress);
    }

    pub fn refuse_connect(&self, err: TransportError) {
        self.state.lock().refuse_connect = Some(err);
    }

    /// 某个套接字已成功交出的缓冲。
    pub fn transmitted(&self, socket: SocketId) -> Vec<Bytes> {
        self.state
            .lock()
            .transmitted
            .get(&socket)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    pub fn is_listening(&self, socket: SocketId) -> bool {
        self.state.lock().listeners.contains(&socket)
    }
}

impl Transport for MemoryTransport {
    fn open(
        &self,
        socket: SocketId,
        _family: AddressFamily,
        kind: SocketKind,
        _protocol: u16,
    ) -> Result<(), TransportError> {
        if kind != SocketKind::Stream {
            return Err(TransportError::Unsupported {
                detail: format!("{kind:?} sockets are not modelled"),
            });
        }
        self.state.lock().calls.push(TransportCall::Open(socket));
        Ok(())
    }

    fn bind(&self, socket: SocketId, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        let mut state = self.state.lock();
        let mut bound = addr;
        if bound.port() == 0 {
            state.next_port = state.next_port.max(40_000).wrapping_add(1);
            bound.set_port(state.next_port);
        }
        if addr.ip() == IpAddr::V4(Ipv4Addr::BROADCAST) {
            return Err(TransportError::InvalidAddress { addr });
        }
        if state.bound.contains_key(&bound) {
            return Err(TransportError::AddressInUse { addr: bound });
        }
        state.bound.insert(bound, socket);
        state.calls.push(TransportCall::Bind(socket, bound));
        Ok(bound)
    }

    fn listen(&self, socket: SocketId, backlog: u32) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_next_listen.take() {
            return Err(err);
        }
        state.listeners.insert(socket);
        state.calls.push(TransportCall::Listen(socket, backlog));
        Ok(())
    }

    fn connect(
        &self,
        socket: SocketId,
        addr: SocketAddr,
        flags: ConnectFlags,
    ) -> Result<ConnectProgress, TransportError> {
        let mut state = self.state.lock();
        if let Some(err) = state.refuse_connect.take() {
            return Err(err);
        }
        state.calls.push(TransportCall::Connect(socket, addr, flags));
        Ok(state
            .connect_progress
            .unwrap_or(ConnectProgress::Established))
    }

    fn transmit(&self, socket: SocketId, payload: &Bytes) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_next_transmit.take() {
            return Err(err);
        }
        match state.transmit_credit {
            Some(0) => return Err(TransportError::WouldBlock),
            Some(credit) => state.transmit_credit = Some(credit - 1),
            None => {}
        }
        if state.partial_transmit {
            return Ok(payload.len() / 2);
        }
        state
            .transmitted
            .entry(socket)
            .or_default()
            .push(payload.clone());
        state
            .calls
            .push(TransportCall::Transmit(socket, payload.len()));
        Ok(payload.len())
    }

    fn shutdown(&self, socket: SocketId) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.listeners.remove(&socket);
        state.calls.push(TransportCall::Shutdown(socket));
        Ok(())
    }

    fn peer_addr(&self, _socket: SocketId) -> Result<SocketAddr, TransportError> {
        Err(TransportError::NotConnected)
    }

    fn release(&self, socket: SocketId) {
        let mut state = self.state.lock();
        state.bound.retain(|_, owner| *owner != socket);
        state.listeners.remove(&socket);
        state.calls.push(TransportCall::Release(socket));
    }
}

/// [`RecordingHooks`] 记录的一次回调。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookEvent {
    New {
        socket: SocketId,
        kind: ProtoType,
        listener: Option<SocketId>,
    },
    Drop {
        socket: SocketId,
    },
    Error {
        socket: SocketId,
    },
    Recv {
        socket: SocketId,
        len: usize,
        off: usize,
        kind: ProtoType,
    },
}

struct Script {
    recv: RecvVerdict,
    new: Result<(), HookFailure>,
}

/// 记录每一次回调的钩子表。
///
/// `new` 返回 `Arc<Self>`，测试可以一边把克隆交给 [`HookTable`](crate::HookTable)，
/// 一边保留原引用读取事件。
pub struct RecordingHooks {
    label: String,
    child_type: Option<ProtoType>,
    script: Mutex<Script>,
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHooks {
    pub fn new(label: &str) -> Arc<Self> {
        Self::build(label, None)
    }

    /// 派生子连接时使用固定的类型标记。
    pub fn with_child_type(label: &str, child_type: ProtoType) -> Arc<Self> {
        Self::build(label, Some(child_type))
    }

    fn build(label: &str, child_type: Option<ProtoType>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_owned(),
            child_type,
            script: Mutex::new(Script {
                recv: RecvVerdict::Consumed,
                new: Ok(()),
            }),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn set_recv_verdict(&self, verdict: RecvVerdict) {
        self.script.lock().recv = verdict;
    }

    pub fn set_new_result(&self, result: Result<(), HookFailure>) {
        self.script.lock().new = result;
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().clone()
    }

    /// 某个套接字收到的回调。
    pub fn events_for(&self, socket: SocketId) -> Vec<HookEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.socket() == socket)
            .cloned()
            .collect()
    }

    fn record(&self, event: HookEvent) {
        self.events.lock().push(event);
    }
}

impl HookEvent {
    pub fn socket(&self) -> SocketId {
        match self {
            HookEvent::New { socket, .. }
            | HookEvent::Drop { socket }
            | HookEvent::Error { socket }
            | HookEvent::Recv { socket, .. } => *socket,
        }
    }
}

impl ConnectionHooks for RecordingHooks {
    fn name(&self) -> &str {
        &self.label
    }

    fn child_type(&self, parent: ProtoType) -> ProtoType {
        self.child_type.unwrap_or(parent)
    }

    fn connection_new(&self, conn: &Connection<'_>) -> Result<(), HookFailure> {
        self.record(HookEvent::New {
            socket: conn.id(),
            kind: conn.proto().kind(),
            listener: conn.proto().listener(),
        });
        self.script.lock().new
    }

    fn connection_drop(&self, conn: &Connection<'_>) {
        self.record(HookEvent::Drop { socket: conn.id() });
    }

    fn connection_error(&self, conn: &Connection<'_>) {
        self.record(HookEvent::Error { socket: conn.id() });
    }

    fn connection_recv(&self, conn: &Connection<'_>, skb: &Bytes, off: usize) -> RecvVerdict {
        self.record(HookEvent::Recv {
            socket: conn.id(),
            len: skb.len(),
            off,
            kind: conn.proto().kind(),
        });
        self.script.lock().recv
    }
}
