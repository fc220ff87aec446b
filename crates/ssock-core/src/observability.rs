//! 日志初始化。
//!
//! # 设计初衷（Why）
//! - 本层只通过 `tracing` 宏产生结构化事件，是否输出、输出到哪里由宿主进程决定；
//! - 未集成完整观测栈的宿主（测试二进制、小型代理）可调用 [`install_logging`]
//!   一次性装好 `fmt` 输出与 `EnvFilter` 过滤。
//!
//! # 契约说明（What）
//! - 进程内只能安装一次全局 Subscriber；若已有，返回 [`LoggingError::AlreadyInstalled`]；
//! - `RUST_LOG` 存在时优先于传入的过滤指令。

use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 日志安装失败。
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,

    #[error("invalid log filter `{filter}`: {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
}

/// 安装全局 `fmt` Subscriber。
///
/// # 教案式注释
/// - **输入 (Inputs)**：`filter` 为 `EnvFilter` 指令，通常取自
///   [`SocketLayerConfig::log_filter`](crate::SocketLayerConfig::log_filter)；
/// - **前置条件 (Preconditions)**：进程尚未设置全局 Subscriber；
/// - **后置条件 (Postconditions)**：成功后本层所有 `tracing` 事件按过滤规则输出到标准输出。
pub fn install_logging(filter: &str) -> Result<(), LoggingError> {
    if tracing::dispatcher::has_been_set() {
        return Err(LoggingError::AlreadyInstalled);
    }
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(filter).map_err(|source| LoggingError::InvalidFilter {
            filter: filter.to_owned(),
            source,
        })?,
    };
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| LoggingError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_filter_is_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = install_logging("ssock_core=verbose").expect_err("filter must be rejected");
        assert!(matches!(
            err,
            LoggingError::InvalidFilter { .. } | LoggingError::AlreadyInstalled
        ));
    }
}
