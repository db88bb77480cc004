//! JavaScript API 能力模块
//!
//! 能力模块是桥接层的外部协作者：在启动时向分发器注册各自的点号
//! 方法族，并独立负责领域校验。
//!
//! - `filesystem` - 文件与目录操作（`fs.*`）
//! - `watcher` - 文件变更监视（`fs.watch` 系列）

pub mod filesystem;
pub mod watcher;

pub use filesystem::FileSystemModule;
pub use watcher::FileWatcherModule;
