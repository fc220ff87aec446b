//! # 配置模块
//!
//! ## 设计动机（Why）
//! - 注册表容量与监听 backlog 上限属于部署参数，不应散落在代码常量中；
//! - 与工作区其余组件一致，使用 `serde` + `toml` 描述配置，缺省字段回落到内置默认值。
//!
//! ## 契约说明（What）
//! - [`SocketLayerConfig::from_toml_str`] 解析后立即执行 [`SocketLayerConfig::validate`]；
//! - `listen` 的 backlog 经 [`SocketLayerConfig::effective_backlog`] 归一：`0` 取默认值，超过上限截断。

use std::string::String;

use serde::Deserialize;
use thiserror::Error;

/// 配置解析或校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse socket layer config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid socket layer config: {reason}")]
    Invalid { reason: String },
}

/// 同步套接字层的运行参数。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SocketLayerConfig {
    /// 钩子注册表容量。
    pub hook_capacity: usize,
    /// `listen` 允许的最大 backlog。
    pub max_backlog: u32,
    /// `listen(.., 0)` 时使用的 backlog。
    pub default_backlog: u32,
    /// `tracing_subscriber::EnvFilter` 指令，供 [`install_logging`](crate::observability::install_logging) 使用。
    pub log_filter: String,
}

impl Default for SocketLayerConfig {
    fn default() -> Self {
        Self {
            hook_capacity: 8,
            max_backlog: 1024,
            default_backlog: 128,
            log_filter: String::from("info"),
        }
    }
}

impl SocketLayerConfig {
    /// 从 TOML 文本解析并校验配置。
    ///
    /// # 教案式注释
    /// - **输入 (Inputs)**：TOML 文本，字段均可省略；未知字段视为错误，以免拼写错误被静默忽略；
    /// - **输出 (Outputs)**：通过校验的配置，或 [`ConfigError`]。
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hook_capacity == 0 {
            return Err(ConfigError::Invalid {
                reason: "hook_capacity must be at least 1".into(),
            });
        }
        if self.max_backlog == 0 {
            return Err(ConfigError::Invalid {
                reason: "max_backlog must be at least 1".into(),
            });
        }
        if self.default_backlog > self.max_backlog {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "default_backlog {} exceeds max_backlog {}",
                    self.default_backlog, self.max_backlog
                ),
            });
        }
        Ok(())
    }

    /// 把调用方请求的 backlog 归一到 `[1, max_backlog]`。
    pub fn effective_backlog(&self, requested: u32) -> u32 {
        let backlog = if requested == 0 {
            self.default_backlog
        } else {
            requested
        };
        backlog.clamp(1, self.max_backlog)
    }
}
