//! 核心模块
//!
//! 包含 shell 的核心功能：
//! - `shell` - 组合根与主消息泵
//! - `error` - 错误类型定义

pub mod error;
pub mod shell;

// 重新导出错误类型
pub use error::{
    BridgeError, BridgeResult, ScriptError, ScriptResult, ShellError, ShellResult,
};

// 重新导出主要类型
pub use shell::{Shell, ShellState, ShellTask, TaskSender};
