/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和运行时校验
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "shell.toml";

/// shell 主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// 窗口配置
    pub window: WindowConfig,

    /// 调试模式
    pub debug_mode: bool,

    /// 远程调试端口
    pub remote_debugging_port: u16,

    /// 启动页地址
    pub startup_url: String,

    /// 启动脚本路径，未设置时 shell 空转一轮后退出
    #[serde(default)]
    pub startup_script: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// 内容就绪前保持隐藏
    pub start_hidden: bool,
    /// 就绪等待超时（秒），超时后强制显示
    pub show_timeout_seconds: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "ShellEngine".to_string(),
            width: 1200,
            height: 800,
            start_hidden: true,
            show_timeout_seconds: 10,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 过滤指令，RUST_LOG 优先于此值
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            debug_mode: false,
            remote_debugging_port: 9222,
            startup_url: "http://localhost:3000".to_string(),
            startup_script: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl ShellConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 加载工作目录下的默认配置文件，缺失时用默认值
    ///
    /// 两条路径都会套用环境变量覆盖。
    pub fn load_default() -> ConfigResult<Self> {
        let mut config = if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::from_toml_file(DEFAULT_CONFIG_FILE)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SHELL_WINDOW_TITLE") {
            self.window.title = val;
        }
        if let Ok(val) = env::var("SHELL_WINDOW_WIDTH") {
            if let Ok(width) = val.parse() {
                self.window.width = width;
            }
        }
        if let Ok(val) = env::var("SHELL_WINDOW_HEIGHT") {
            if let Ok(height) = val.parse() {
                self.window.height = height;
            }
        }
        if let Ok(val) = env::var("SHELL_DEBUG") {
            self.debug_mode = val == "1" || val.eq_ignore_ascii_case("true");
        }
        if let Ok(val) = env::var("SHELL_REMOTE_DEBUGGING_PORT") {
            if let Ok(port) = val.parse() {
                self.remote_debugging_port = port;
            }
        }
        if let Ok(val) = env::var("SHELL_STARTUP_URL") {
            self.startup_url = val;
        }
        if let Ok(val) = env::var("SHELL_STARTUP_SCRIPT") {
            self.startup_script = Some(PathBuf::from(val));
        }
    }

    /// 校验配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::ValidationError(
                "Window dimensions must be non-zero".to_string(),
            ));
        }
        if self.startup_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "Startup URL must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
