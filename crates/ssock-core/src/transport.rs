//! 与底层网络栈的边界。
//!
//! # 模块定位（Why）
//! - TCP 本身（accept、重传、拥塞控制）不属于本层；这里只描述同步套接字层向网络栈发出的调用。
//! - 反方向的事件（接受新连接、数据投递、建连完成、传输错误、终止确认）由网络栈调用
//!   [`SocketLayer`](crate::SocketLayer) 上的对应入口。
//!
//! # 契约说明（What）
//! - 所有方法都必须迅速返回，不得等待网络事件；
//! - `transmit` 要么整块接受缓冲，要么返回 [`TransportError::WouldBlock`]，绝不拆分缓冲；
//! - 实现必须 `Send + Sync`，控制面与投递路径会从不同线程调用。

use std::{net::SocketAddr, string::String};

use bytes::Bytes;
use thiserror::Error;

use crate::socket::{AddressFamily, SocketId, SocketKind};

/// `connect` 的行为开关。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectFlags {
    nonblocking: bool,
}

impl ConnectFlags {
    /// 阻塞建连：返回时连接已建立或已失败。
    pub const BLOCKING: Self = Self { nonblocking: false };
    /// 非阻塞建连：完成结果通过新连接钩子或错误钩子观察。
    pub const NONBLOCK: Self = Self { nonblocking: true };

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }
}

/// 传输层对 `connect` 的即时答复。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectProgress {
    Established,
    InProgress,
}

/// 传输边界错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("address `{addr}` is already in use")]
    AddressInUse { addr: SocketAddr },

    #[error("address `{addr}` is not acceptable")]
    InvalidAddress { addr: SocketAddr },

    #[error("transmit queue is full")]
    WouldBlock,

    #[error("socket is not connected")]
    NotConnected,

    #[error("unsupported socket configuration: {detail}")]
    Unsupported { detail: String },

    #[error("{detail}")]
    Failed { detail: String },
}

/// 同步套接字层所依赖的网络栈能力。
///
/// # 教案式注释
/// - **意图 (Why)**：把 OS 套接字实现隔离在 trait 之后，核心逻辑可以在内存传输层上完整测试。
/// - **契约 (What)**：
///   - `open` 在 [`SocketLayer::create`](crate::SocketLayer::create) 时调用一次；
///   - `bind` 返回实际绑定地址（端口 0 时由传输层分配）；
///   - `shutdown` 只发起有序关闭，终止确认稍后经
///     [`SocketLayer::terminated`](crate::SocketLayer::terminated) 送回；
///   - `release` 之后不会再收到该套接字的任何调用。
pub trait Transport: Send + Sync + 'static {
    fn open(
        &self,
        socket: SocketId,
        family: AddressFamily,
        kind: SocketKind,
        protocol: u16,
    ) -> Result<(), TransportError>;

    fn bind(&self, socket: SocketId, addr: SocketAddr) -> Result<SocketAddr, TransportError>;

    fn listen(&self, socket: SocketId, backlog: u32) -> Result<(), TransportError>;

    fn connect(
        &self,
        socket: SocketId,
        addr: SocketAddr,
        flags: ConnectFlags,
    ) -> Result<ConnectProgress, TransportError>;

    /// 交出一个完整缓冲；成功时返回的字节数必须等于 `payload.len()`。
    fn transmit(&self, socket: SocketId, payload: &Bytes) -> Result<usize, TransportError>;

    fn shutdown(&self, socket: SocketId) -> Result<(), TransportError>;

    fn peer_addr(&self, socket: SocketId) -> Result<SocketAddr, TransportError>;

    fn release(&self, socket: SocketId);
}
