//! # SocketLayer：套接字生命周期管理
//!
//! ## 核心意图（Why）
//! - 作为服务顶层上下文，统一持有钩子注册表、套接字表与传输层；
//! - 控制面（create/bind/listen/connect/send/close/release/getpeername）与网络栈事件入口
//!   （accept/deliver/connect_complete/transport_error/terminated）都在这里汇合，
//!   以便状态迁移与钩子触发遵守同一套“至多一次”规则。
//!
//! ## 行为契约（What）
//! - 接受的连接在对外可见（插入套接字表）之前就已安装好继承来的钩子；
//! - `send` 从队首到队尾逐个交出缓冲，传输层拒绝的缓冲重新挂回队首并报告短写，缓冲绝不拆分；
//! - `close` 幂等；`release` 之后任何操作 panic；
//! - 钩子调用时不持有任何锁。
//!
//! ## 风险提示（Trade-offs）
//! - 同一套接字上并发 `send` 与 `close` 需由调用方串行化；
//! - 投递路径对未知套接字只返回 [`DeliverOutcome::UnknownSocket`]，不视为错误。

use core::sync::atomic::{AtomicU64, Ordering};
use std::{net::SocketAddr, sync::Arc, vec::Vec};

use bytes::Bytes;
use dashmap::DashMap;
use ssock_buffer::{SkbArena, SkbQueue};
use tracing::{debug, trace, warn};

use crate::{
    config::{ConfigError, SocketLayerConfig},
    error::{Result, SocketError},
    hooks::{Connection, HookFailure, RecvVerdict},
    proto::ProtoDescriptor,
    registry::HookRegistry,
    socket::{AddressFamily, Socket, SocketId, SocketKind, SocketState},
    transport::{ConnectFlags, ConnectProgress, Transport, TransportError},
};

/// `send` 的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// 队列已全部交给传输层。
    Complete { buffers: usize, bytes: usize },
    /// 传输层暂时无法接收或只接受了部分字节；未交出的缓冲完整留在队列中，队首为被拒绝的那一个。
    ShortWrite { buffers: usize, bytes: usize },
}

impl SendOutcome {
    pub fn bytes(&self) -> usize {
        match self {
            SendOutcome::Complete { bytes, .. } | SendOutcome::ShortWrite { bytes, .. } => *bytes,
        }
    }

    pub fn is_short(&self) -> bool {
        matches!(self, SendOutcome::ShortWrite { .. })
    }
}

/// 一次数据投递的处理结果，供网络栈决定是否继续投递。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliverOutcome {
    Consumed,
    NeedMore,
    /// 接收钩子要求断开，连接已发起有序关闭。
    Dropped,
    /// 接收钩子报告致命错误，套接字已进入 `Error`。
    Failed,
    /// 套接字上尚未安装钩子，数据被丢弃。
    NoHooks,
    UnknownSocket,
}

/// 同步套接字层的顶层上下文。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 替代进程级全局状态：注册表、套接字表与传输层都挂在此对象上，随其创建与销毁。
///
/// ## 逻辑 (How)
/// - 套接字表使用 `DashMap` 分片存储，投递路径按 `SocketId` 查找时不会与其他分片上的控制面操作争用；
/// - 每个操作先在套接字状态锁内校验/迁移，再调用传输层，最后在锁外触发钩子。
///
/// ## 契约 (What)
/// - 所有方法可以从任意线程并发调用；唯一例外是同一套接字上的 `send` 与 `close`；
/// - 钩子回调中可以安全地再次调用本对象的方法。
pub struct SocketLayer {
    transport: Arc<dyn Transport>,
    registry: HookRegistry,
    sockets: DashMap<SocketId, Arc<Socket>>,
    next_id: AtomicU64,
    config: SocketLayerConfig,
}

impl SocketLayer {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SocketLayerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            transport,
            registry: HookRegistry::new(config.hook_capacity),
            sockets: DashMap::new(),
            next_id: AtomicU64::new(1),
            config,
        })
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SocketLayerConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// 按标识查找仍在表中的套接字。
    pub fn socket(&self, id: SocketId) -> Option<Arc<Socket>> {
        self.sockets.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    fn lookup(&self, id: SocketId) -> Result<Arc<Socket>> {
        self.socket(id).ok_or(SocketError::UnknownSocket { socket: id })
    }

    fn allocate_id(&self) -> SocketId {
        SocketId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// 创建套接字，描述符初始化为未初始化的根描述符。
    pub fn create(
        &self,
        family: AddressFamily,
        kind: SocketKind,
        protocol: u16,
    ) -> Result<Arc<Socket>> {
        let id = self.allocate_id();
        self.transport
            .open(id, family, kind, protocol)
            .map_err(|err| SocketError::from_transport(id, err))?;
        let socket = Arc::new(Socket::new(id, family, kind, protocol, SocketState::Created));
        self.sockets.insert(id, Arc::clone(&socket));
        debug!(socket = %id, ?family, ?kind, protocol, "socket created");
        Ok(socket)
    }

    /// 在写锁内替换套接字挂载的描述符；已安装的钩子保持不变，直到下一次安装。
    pub fn attach_proto(&self, socket: &Socket, proto: ProtoDescriptor) {
        socket.live_state("attach_proto");
        socket.callbacks().write().attach(proto);
    }

    /// 把挂载描述符的钩子安装到投递路径，用于在 `connect` 之前准备客户端套接字。
    pub fn set_callbacks(&self, socket: &Socket) -> Result<()> {
        socket.live_state("set_callbacks");
        self.registry.install(socket)
    }

    pub fn bind(&self, socket: &Socket, addr: SocketAddr) -> Result<SocketAddr> {
        socket.expect_state("bind", &[SocketState::Created])?;
        if !socket.family().accepts(&addr) {
            return Err(SocketError::InvalidAddress {
                socket: socket.id(),
                addr,
            });
        }
        let bound = self
            .transport
            .bind(socket.id(), addr)
            .map_err(|err| SocketError::from_transport(socket.id(), err))?;
        socket.transition("bind", &[SocketState::Created], SocketState::Bound)?;
        socket.set_local_addr(bound);
        debug!(socket = %socket.id(), %bound, "socket bound");
        Ok(bound)
    }

    /// 开始监听。
    ///
    /// # 教案式注释
    /// - **前置条件**：套接字处于 `Bound`，并已通过 [`SocketLayer::attach_proto`] 挂上已注册钩子表的描述符；
    /// - **执行逻辑**：先安装钩子再通知传输层，确保任何接受事件到达时监听者的快照已经可读；
    ///   传输层拒绝时恢复安装前的快照，`Bound` 套接字上不会残留监听者的钩子；
    /// - **后置条件**：状态为 `Listening`；backlog 经配置归一后交给传输层。
    pub fn listen(&self, socket: &Socket, backlog: u32) -> Result<()> {
        socket.expect_state("listen", &[SocketState::Bound])?;
        let backlog = self.config.effective_backlog(backlog);
        let previous = {
            let mut writer = socket.callbacks().write();
            let previous = writer.installed();
            self.registry.install_locked(socket.id(), &mut writer)?;
            previous
        };
        if let Err(err) = self.transport.listen(socket.id(), backlog) {
            socket.callbacks().write().restore(previous);
            let error = SocketError::from_transport(socket.id(), err);
            warn!(socket = %socket.id(), error = %error, "listen rejected by transport");
            return Err(error);
        }
        socket.transition("listen", &[SocketState::Bound], SocketState::Listening)?;
        debug!(socket = %socket.id(), backlog, "socket listening");
        Ok(())
    }

    /// 发起主动连接。
    ///
    /// 阻塞模式下返回时连接已建立，新连接钩子已触发；非阻塞模式返回
    /// [`ConnectProgress::InProgress`]，完成结果经 [`SocketLayer::connect_complete`] 送回。
    pub fn connect(
        &self,
        socket: &Socket,
        addr: SocketAddr,
        flags: ConnectFlags,
    ) -> Result<ConnectProgress> {
        const FROM: &[SocketState] = &[SocketState::Created, SocketState::Bound];
        socket.expect_state("connect", FROM)?;
        if !socket.family().accepts(&addr) {
            return Err(SocketError::InvalidAddress {
                socket: socket.id(),
                addr,
            });
        }
        if socket.callbacks().proto().is_initialized() {
            self.registry.install(socket)?;
        }
        let previous = socket.transition("connect", FROM, SocketState::Connecting)?;
        let progress = match self.transport.connect(socket.id(), addr, flags) {
            Ok(progress) => progress,
            Err(err) => {
                socket.force_state("connect", previous);
                return Err(SocketError::from_transport(socket.id(), err));
            }
        };
        socket.set_peer_addr(addr);
        match progress {
            ConnectProgress::Established => {
                socket.transition(
                    "connect",
                    &[SocketState::Connecting],
                    SocketState::Connected,
                )?;
                debug!(socket = %socket.id(), peer = %addr, "connection established");
                self.fire_new(socket);
            }
            ConnectProgress::InProgress => {
                debug!(
                    socket = %socket.id(),
                    peer = %addr,
                    nonblocking = flags.is_nonblocking(),
                    "connection in progress"
                );
            }
        }
        Ok(progress)
    }

    /// 按队首到队尾顺序把缓冲交给传输层。
    ///
    /// # 教案式注释
    ///
    /// ## 意图 (Why)
    /// - 上层一次准备好一批响应缓冲，本层负责在不复制、不拆分的前提下尽量多地交出。
    ///
    /// ## 逻辑 (How)
    /// - 逐个 `dequeue_head`：传输层整块接受则释放句柄（字节所有权已随 `Bytes` 转交）；
    /// - 返回 `WouldBlock` 或只接受了部分字节时，把该缓冲 `enqueue_head` 挂回队首并报告短写；
    /// - 其他传输错误同样挂回队首，套接字进入 `Error` 并触发错误钩子。
    ///
    /// ## 契约 (What)
    /// - 仅 `Connected` 状态可发送；
    /// - 缓冲绝不拆分：传输层只接受了一部分字节时，按未发送处理，整块挂回队首并报告短写。
    pub fn send(
        &self,
        socket: &Socket,
        queue: &mut SkbQueue,
        arena: &mut SkbArena,
    ) -> Result<SendOutcome> {
        socket.expect_state("send", &[SocketState::Connected])?;
        let mut buffers = 0;
        let mut bytes = 0;
        while let Some(skb) = queue.dequeue_head(arena) {
            let payload = arena.payload(skb).clone();
            match self.transport.transmit(socket.id(), &payload) {
                Ok(sent) if sent < payload.len() => {
                    queue.enqueue_head(arena, skb);
                    warn!(
                        socket = %socket.id(),
                        ?skb,
                        sent,
                        len = payload.len(),
                        "transport accepted part of a buffer; buffer kept whole at queue head"
                    );
                    return Ok(SendOutcome::ShortWrite { buffers, bytes });
                }
                Ok(_) => {
                    let sent = payload.len();
                    arena.release(skb);
                    buffers += 1;
                    bytes += sent;
                }
                Err(TransportError::WouldBlock) => {
                    queue.enqueue_head(arena, skb);
                    trace!(socket = %socket.id(), buffers, bytes, "short write");
                    return Ok(SendOutcome::ShortWrite { buffers, bytes });
                }
                Err(err) => {
                    queue.enqueue_head(arena, skb);
                    let error = SocketError::from_transport(socket.id(), err);
                    self.fail(socket, &error);
                    return Err(error);
                }
            }
        }
        trace!(socket = %socket.id(), buffers, bytes, "queue flushed");
        Ok(SendOutcome::Complete { buffers, bytes })
    }

    /// 有序关闭，幂等。
    pub fn close(&self, socket: &Socket) -> Result<()> {
        match socket.live_state("close") {
            SocketState::Created | SocketState::Bound => {
                socket.transition(
                    "close",
                    &[SocketState::Created, SocketState::Bound],
                    SocketState::Closed,
                )?;
                debug!(socket = %socket.id(), "unconnected socket closed");
                Ok(())
            }
            SocketState::Listening | SocketState::Connecting | SocketState::Connected => {
                socket.transition(
                    "close",
                    &[
                        SocketState::Listening,
                        SocketState::Connecting,
                        SocketState::Connected,
                    ],
                    SocketState::Closing,
                )?;
                debug!(socket = %socket.id(), "orderly shutdown started");
                self.transport
                    .shutdown(socket.id())
                    .map_err(|err| SocketError::from_transport(socket.id(), err))
            }
            SocketState::Closing | SocketState::Closed | SocketState::Error => {
                trace!(socket = %socket.id(), "close on already closing socket ignored");
                Ok(())
            }
            SocketState::Released => unreachable!("live_state rejects released sockets"),
        }
    }

    /// 终止确认后归还套接字：摘下钩子、通知传输层并从套接字表移除。
    ///
    /// 迁移到 `Released` 是第一步，并发的第二次 `release` 会在状态锁内看到终态并 panic，
    /// 传输层只会收到一次 `release`。
    pub fn release(&self, socket: &Socket) -> Result<()> {
        socket.transition(
            "release",
            &[
                SocketState::Created,
                SocketState::Bound,
                SocketState::Closed,
                SocketState::Error,
            ],
            SocketState::Released,
        )?;
        socket.callbacks().write().detach();
        self.transport.release(socket.id());
        self.sockets.remove(&socket.id());
        debug!(socket = %socket.id(), "socket released");
        Ok(())
    }

    /// 对端地址，仅 `Connected` 状态有效。
    pub fn getpeername(&self, socket: &Socket) -> Result<SocketAddr> {
        if socket.live_state("getpeername") != SocketState::Connected {
            return Err(SocketError::NotConnected {
                socket: socket.id(),
            });
        }
        if let Some(peer) = socket.peer_addr() {
            return Ok(peer);
        }
        let peer = self
            .transport
            .peer_addr(socket.id())
            .map_err(|err| SocketError::from_transport(socket.id(), err))?;
        socket.set_peer_addr(peer);
        Ok(peer)
    }

    /// 网络栈接受了监听套接字上的新连接。
    ///
    /// # 教案式注释
    ///
    /// ## 意图 (Why)
    /// - 子连接直接沿用监听者的协议行为，无需上层再次注册。
    ///
    /// ## 逻辑 (How)
    /// 1. 读取监听者已安装的快照，按钩子的 `child_type` 派生子描述符；
    /// 2. 在子套接字的写锁内挂载并安装，此时子套接字尚未进入套接字表，任何其他上下文都看不到它；
    /// 3. 插入套接字表后在锁外触发新连接钩子。
    ///
    /// ## 契约 (What)
    /// - 监听者必须处于 `Listening`；钩子表若已被注销，返回 `NotFound` 且不创建子连接。
    pub fn accept_notify(&self, listener: SocketId, peer: SocketAddr) -> Result<Arc<Socket>> {
        let parent = self.lookup(listener)?;
        parent.expect_state("accept", &[SocketState::Listening])?;
        let snapshot = parent
            .callbacks()
            .load()
            .ok_or(SocketError::MissingProto { socket: listener })?;
        let child_kind = snapshot.hooks().hooks().child_type(snapshot.proto().kind());
        let proto = snapshot.proto().inherit(listener, child_kind);

        let id = self.allocate_id();
        let child = Arc::new(Socket::new(
            id,
            parent.family(),
            parent.kind(),
            parent.protocol(),
            SocketState::Connected,
        ));
        {
            let mut writer = child.callbacks().write();
            writer.attach(proto);
            self.registry.install_locked(id, &mut writer)?;
        }
        if let Some(local) = parent.local_addr() {
            child.set_local_addr(local);
        }
        child.set_peer_addr(peer);
        self.sockets.insert(id, Arc::clone(&child));
        debug!(
            socket = %id,
            listener = %listener,
            %peer,
            kind = child_kind.0,
            "connection accepted"
        );
        self.fire_new(&child);
        Ok(child)
    }

    /// 把收到的数据投递给套接字的接收钩子。
    ///
    /// 在锁外调用钩子；`off` 必须不超过缓冲长度。
    pub fn deliver(&self, id: SocketId, skb: Bytes, off: usize) -> DeliverOutcome {
        assert!(
            off <= skb.len(),
            "delivery offset {off} exceeds buffer length {}",
            skb.len()
        );
        let Some(socket) = self.socket(id) else {
            trace!(socket = %id, "delivery for unknown socket discarded");
            return DeliverOutcome::UnknownSocket;
        };
        let Some(snapshot) = socket.callbacks().load() else {
            trace!(socket = %id, len = skb.len(), "delivery without hooks discarded");
            return DeliverOutcome::NoHooks;
        };
        let conn = Connection::new(&socket, snapshot.proto());
        match snapshot.hooks().hooks().connection_recv(&conn, &skb, off) {
            RecvVerdict::Consumed => DeliverOutcome::Consumed,
            RecvVerdict::NeedMore => DeliverOutcome::NeedMore,
            RecvVerdict::Error(HookFailure::Drop) => {
                debug!(
                    socket = %id,
                    table = snapshot.hooks().name(),
                    "receive hook requested drop"
                );
                if let Err(err) = self.close(&socket) {
                    warn!(socket = %id, error = %err, "close after receive drop failed");
                }
                DeliverOutcome::Dropped
            }
            RecvVerdict::Error(HookFailure::Fatal) => {
                let error = SocketError::Transport {
                    socket: id,
                    detail: format!("receive hook `{}` failed", snapshot.hooks().name()),
                };
                self.fail(&socket, &error);
                DeliverOutcome::Failed
            }
        }
    }

    /// 非阻塞建连的完成通知。
    pub fn connect_complete(
        &self,
        id: SocketId,
        result: core::result::Result<(), TransportError>,
    ) -> Result<()> {
        let socket = self.lookup(id)?;
        match result {
            Ok(()) => {
                socket.transition(
                    "connect_complete",
                    &[SocketState::Connecting],
                    SocketState::Connected,
                )?;
                debug!(socket = %id, "non-blocking connect completed");
                self.fire_new(&socket);
            }
            Err(err) => {
                let error = SocketError::from_transport(id, err);
                self.fail(&socket, &error);
            }
        }
        Ok(())
    }

    /// 传输层报告连接级致命错误。
    pub fn transport_error(&self, id: SocketId, err: TransportError) -> Result<()> {
        let socket = self.lookup(id)?;
        let error = SocketError::from_transport(id, err);
        self.fail(&socket, &error);
        Ok(())
    }

    /// 传输层确认连接终止（本端关闭完成或对端关闭）。
    pub fn terminated(&self, id: SocketId) -> Result<()> {
        let socket = self.lookup(id)?;
        match socket.transition(
            "terminated",
            &[
                SocketState::Listening,
                SocketState::Connecting,
                SocketState::Connected,
                SocketState::Closing,
            ],
            SocketState::Closed,
        ) {
            Ok(previous) => {
                debug!(socket = %id, from = ?previous, "connection terminated");
            }
            Err(_) => {
                trace!(socket = %id, state = ?socket.state(), "termination in terminal state");
            }
        }
        self.fire_drop(&socket);
        Ok(())
    }

    /// 关闭所有套接字并清空注册表，返回处理的套接字数量。
    pub fn shutdown(&self) -> usize {
        let sockets: Vec<Arc<Socket>> = self
            .sockets
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for socket in &sockets {
            if let Err(err) = self.close(socket) {
                warn!(socket = %socket.id(), error = %err, "close during shutdown failed");
            }
        }
        let tables = self.registry.clear();
        debug!(sockets = sockets.len(), tables, "socket layer shut down");
        sockets.len()
    }

    /// 连接级失败：迁移到 `Error` 并触发错误钩子（至多一次）。
    fn fail(&self, socket: &Socket, error: &SocketError) {
        let moved = socket.transition(
            "fail",
            &[
                SocketState::Listening,
                SocketState::Connecting,
                SocketState::Connected,
                SocketState::Closing,
                SocketState::Error,
            ],
            SocketState::Error,
        );
        if let Err(state_err) = moved {
            trace!(socket = %socket.id(), error = %error, reason = %state_err, "failure ignored");
            return;
        }
        warn!(socket = %socket.id(), code = error.code(), error = %error, "connection failed");
        self.fire_error(socket);
    }

    fn fire_new(&self, socket: &Socket) {
        let Some(snapshot) = socket.callbacks().load() else {
            trace!(socket = %socket.id(), "no hooks installed for new connection");
            return;
        };
        if !socket.claim_new() {
            trace!(socket = %socket.id(), "connection_new already delivered");
            return;
        }
        let conn = Connection::new(socket, snapshot.proto());
        match snapshot.hooks().hooks().connection_new(&conn) {
            Ok(()) => {
                trace!(socket = %socket.id(), table = snapshot.hooks().name(), "connection_new");
            }
            Err(HookFailure::Drop) => {
                debug!(socket = %socket.id(), "connection_new rejected the connection");
                if let Err(err) = self.close(socket) {
                    warn!(
                        socket = %socket.id(),
                        error = %err,
                        "close after rejected connection failed"
                    );
                }
            }
            Err(HookFailure::Fatal) => {
                let error = SocketError::Transport {
                    socket: socket.id(),
                    detail: format!("connection_new hook `{}` failed", snapshot.hooks().name()),
                };
                self.fail(socket, &error);
            }
        }
    }

    fn fire_drop(&self, socket: &Socket) {
        if !socket.new_claimed() {
            return;
        }
        let Some(snapshot) = socket.callbacks().load() else {
            return;
        };
        if !socket.claim_drop() {
            trace!(socket = %socket.id(), "connection_drop already delivered");
            return;
        }
        snapshot
            .hooks()
            .hooks()
            .connection_drop(&Connection::new(socket, snapshot.proto()));
        trace!(socket = %socket.id(), table = snapshot.hooks().name(), "connection_drop");
    }

    fn fire_error(&self, socket: &Socket) {
        let Some(snapshot) = socket.callbacks().load() else {
            return;
        };
        if !socket.claim_error() {
            trace!(socket = %socket.id(), "connection_error already delivered");
            return;
        }
        snapshot
            .hooks()
            .hooks()
            .connection_error(&Connection::new(socket, snapshot.proto()));
        trace!(socket = %socket.id(), table = snapshot.hooks().name(), "connection_error");
    }
}

impl core::fmt::Debug for SocketLayer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SocketLayer")
            .field("sockets", &self.sockets.len())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
