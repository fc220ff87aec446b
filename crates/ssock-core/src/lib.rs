#![deny(unsafe_code)]
#![doc = r#"
# ssock-core

## 设计动机（Why）
- **定位**：同步套接字层的核心。上层协议模块（HTTP/TLS 代理引擎等）注册钩子表，
  本层把钩子安装到原始套接字上，并在监听套接字派生新连接时让子连接继承监听者的行为。
- **并发前提**：网络栈的异步投递路径与控制面（bind/listen/connect/close）真实并行执行；
  任一投递都不得观察到“钩子表与描述符”被写了一半的状态。

## 核心契约（What）
- [`SocketLayer`] 是服务顶层上下文：持有钩子注册表、套接字表、传输层与配置；
- 生命周期：`Created → Bound → Listening → {Connected | Closing} → Released`，
  另有 `Connecting`（非阻塞建连）、`Closed`（传输层确认终止）与 `Error`；
- 误用（操作已 `Released` 的套接字、重复摘除缓冲）是编程错误，直接 panic；
  可恢复的失败统一返回 [`SocketError`]。

## 实现策略（How）
- 每个套接字一把 [`CallbackGuard`]：写者（listen、accept 时安装）经 `parking_lot::Mutex` 串行化，
  读者（投递路径）通过 `arc-swap` 无锁读取不可变的 (描述符, 钩子表) 快照；
- 发送路径消费调用方提供的 [`SkbQueue`](ssock_buffer::SkbQueue)，被传输层拒绝的缓冲重新挂回队首；
- 钩子调用时不持有任何锁，钩子内部可以安全地回调本层操作。

## 风险与考量（Trade-offs）
- 同一套接字上并发调用 `send` 与 `close` 未做内部保护，调用方必须自行串行化；
- 注册表容量在构造时确定，运行期不扩容。
"#]

pub mod config;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod layer;
pub mod observability;
pub mod proto;
pub mod registry;
pub mod socket;
/// 测试桩命名空间：内存传输层与记录型钩子表。
///
/// 集成测试、基准与下游协议模块的单元测试共用这些实现，避免各处重复搭建假网络栈。
pub mod test_stubs;
pub mod transport;

pub use config::{ConfigError, SocketLayerConfig};
pub use error::{Result, SocketError};
pub use guard::{CallbackGuard, CallbackSnapshot, CallbackWriter};
pub use hooks::{Connection, ConnectionHooks, HookFailure, HookTable, HookTableId, RecvVerdict};
pub use layer::{DeliverOutcome, SendOutcome, SocketLayer};
pub use observability::{LoggingError, install_logging};
pub use proto::{ProtoDescriptor, ProtoType};
pub use registry::HookRegistry;
pub use socket::{AddressFamily, Socket, SocketId, SocketKind, SocketState};
pub use transport::{ConnectFlags, ConnectProgress, Transport, TransportError};

pub use ssock_buffer::{SkbArena, SkbHandle, SkbQueue};
