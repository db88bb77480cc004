//! 统一错误处理模块
//!
//! 提供 shell 范围内的统一错误类型定义。
//!
//! ## 错误类型分层
//!
//! - 桥接层错误（`BridgeError`）：调用分发与信封解析
//! - 脚本层错误（`ScriptError`）：脚本上下文的创建与求值
//! - 配置错误（`config::ConfigError`）：配置文件加载与校验
//!
//! 处理器的领域错误（400/403/404）不走这里，它们通过
//! `InvokeResponse::set_error` 直接写入应答；错误类型只承载意外
//! 故障，由分发器映射为 500 应答。

use thiserror::Error;

/// shell 核心错误类型
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("File watcher error: {0}")]
    Watcher(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("General error: {0}")]
    General(String),
}

/// 桥接层错误
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("No scripting context attached")]
    NoScriptContext,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),
}

/// 脚本系统错误
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Script runtime error: {0}")]
    Runtime(String),

    #[error("Script evaluation error: {0}")]
    Evaluation(String),

    #[error("Invalid script binding: {0}")]
    InvalidBinding(String),
}

/// shell 结果类型别名
pub type ShellResult<T> = Result<T, ShellError>;
pub type BridgeResult<T> = Result<T, BridgeError>;
pub type ScriptResult<T> = Result<T, ScriptError>;
