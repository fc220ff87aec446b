//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义同步套接字层对外暴露的可恢复错误；
//! - 区分“调用方可重试”（`WouldBlock`）与“连接级致命”（`Transport`），
//!   便于上层协议模块决定关闭还是等待可写。
//!
//! ## 设计要求（What）
//! - 所有变体派生 `thiserror::Error`，携带可读上下文；
//! - [`SocketError::code`] 返回稳定的点分错误码，供日志与告警聚合；
//! - 契约违例（操作已释放套接字、重复摘除缓冲）不在此建模，而是直接 panic。

use std::{net::SocketAddr, string::String};

use thiserror::Error;

use crate::{
    socket::{SocketId, SocketState},
    transport::TransportError,
};

/// 本层统一的结果别名。
pub type Result<T, E = SocketError> = core::result::Result<T, E>;

/// 同步套接字层错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把注册表、生命周期与传输边界的失败收敛到一个枚举，调用方 `?` 即可传播。
/// - **契约 (What)**：
///   - 所有变体 `Send + Sync + 'static`，可跨线程传递；
///   - 只有 [`SocketError::WouldBlock`] 被视为可恢复（调用方在可写后重试）。
/// - **设计权衡 (Trade-offs)**：钩子表以名称而非引用记录在错误中，避免错误值延长钩子表生命周期。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SocketError {
    /// 地址与套接字族不匹配，或被传输层判定为非法。
    #[error("address `{addr}` is not valid for socket {socket}")]
    InvalidAddress { socket: SocketId, addr: SocketAddr },

    /// 地址已被其他套接字占用。
    #[error("address `{addr}` is already in use (socket {socket})")]
    AddressInUse { socket: SocketId, addr: SocketAddr },

    /// 同一钩子表被重复注册。
    #[error("hook table `{table}` is already registered")]
    AlreadyRegistered { table: String },

    /// 注销或安装时钩子表不在注册表中。
    #[error("hook table `{table}` is not registered")]
    NotFound { table: String },

    /// 注册表已满。
    #[error("hook registry is full (capacity {capacity})")]
    RegistryFull { capacity: usize },

    /// 传输层背压；调用方应在可写后重试。
    #[error("transmit path of socket {socket} would block")]
    WouldBlock { socket: SocketId },

    /// 连接级致命错误，套接字已进入 `Error` 状态。
    #[error("transport failure on socket {socket}: {detail}")]
    Transport { socket: SocketId, detail: String },

    /// 当前状态不允许该操作。
    #[error("`{operation}` is not permitted on socket {socket} in state {state:?}")]
    InvalidState {
        socket: SocketId,
        operation: &'static str,
        state: SocketState,
    },

    /// 查询对端地址时套接字尚未建立连接。
    #[error("socket {socket} is not connected")]
    NotConnected { socket: SocketId },

    /// 套接字没有挂载带钩子表的协议描述符。
    #[error("socket {socket} has no protocol descriptor with hooks attached")]
    MissingProto { socket: SocketId },

    /// 套接字表中不存在该标识（已释放或从未创建）。
    #[error("socket {socket} is unknown to this layer")]
    UnknownSocket { socket: SocketId },

    /// 不支持的套接字组合。
    #[error("unsupported socket configuration: {detail}")]
    Unsupported { detail: String },
}

impl SocketError {
    /// 稳定错误码，前缀统一为 `ssock.`。
    pub fn code(&self) -> &'static str {
        match self {
            SocketError::InvalidAddress { .. } => "ssock.addr.invalid",
            SocketError::AddressInUse { .. } => "ssock.addr.in_use",
            SocketError::AlreadyRegistered { .. } => "ssock.hooks.already_registered",
            SocketError::NotFound { .. } => "ssock.hooks.not_found",
            SocketError::RegistryFull { .. } => "ssock.hooks.registry_full",
            SocketError::WouldBlock { .. } => "ssock.send.would_block",
            SocketError::Transport { .. } => "ssock.transport.failure",
            SocketError::InvalidState { .. } => "ssock.state.invalid",
            SocketError::NotConnected { .. } => "ssock.state.not_connected",
            SocketError::MissingProto { .. } => "ssock.proto.missing",
            SocketError::UnknownSocket { .. } => "ssock.socket.unknown",
            SocketError::Unsupported { .. } => "ssock.socket.unsupported",
        }
    }

    /// 是否为调用方可重试的背压信号。
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SocketError::WouldBlock { .. })
    }

    /// 将传输边界的错误补上套接字上下文。
    pub(crate) fn from_transport(socket: SocketId, err: TransportError) -> Self {
        match err {
            TransportError::AddressInUse { addr } => SocketError::AddressInUse { socket, addr },
            TransportError::InvalidAddress { addr } => SocketError::InvalidAddress { socket, addr },
            TransportError::WouldBlock => SocketError::WouldBlock { socket },
            TransportError::NotConnected => SocketError::NotConnected { socket },
            TransportError::Unsupported { detail } => SocketError::Unsupported { detail },
            TransportError::Failed { detail } => SocketError::Transport { socket, detail },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_keep_socket_context() {
        let socket = SocketId::from_raw(7);
        let addr: SocketAddr = "127.0.0.1:80".parse().expect("literal address");
        let err = SocketError::from_transport(socket, TransportError::AddressInUse { addr });
        assert_eq!(err, SocketError::AddressInUse { socket, addr });
        assert_eq!(err.code(), "ssock.addr.in_use");

        let blocked = SocketError::from_transport(socket, TransportError::WouldBlock);
        assert!(blocked.is_recoverable());
        assert!(
            !SocketError::from_transport(
                socket,
                TransportError::Failed {
                    detail: "reset".into()
                }
            )
            .is_recoverable()
        );
    }
}
