//! 终端核心模块
//!
//! 每条命令一个 PTY 进程，输出写入时间线块。
//!
//! ## 模块结构
//! - `error` - 错误类型定义
//! - `events` - 引擎事件与广播总线
//! - `connections` - PTY 启动契约与本地实现
//! - `registry` - 按块 ID 管理进程句柄
//! - `classify` - 命令分类与 `cd` 解析
//! - `shell_env` - shell 解析与登录 PATH
//! - `runner` - 一次性命令执行器
//!
//! ## 使用示例
//! ```ignore
//! use infinitty_lib::terminal::{CommandRunner, LocalPtySpawner, ProcessRegistry, EventBus};
//!
//! let runner = CommandRunner::new(config, Arc::new(LocalPtySpawner::new()), processes, events);
//! let handle = runner.run(timeline.clone(), "ls -la").await?;
//! handle.wait().await;
//! ```

pub mod classify;
pub mod connections;
pub mod error;
pub mod events;
pub mod registry;
pub mod runner;
pub mod shell_env;

// 重新导出常用类型
pub use classify::{parse_cd_target, resolve_cd_path, CdTarget, CommandClassifier, CommandMode};
pub use connections::{
    LocalPtySpawner, PtyEvent, PtyHandle, PtySpawnRequest, PtySpawner, SpawnedPty, TermSize,
};
pub use error::TerminalError;
pub use events::{event_names, DirectoryChangedEvent, EngineEvent, EventBus};
pub use registry::ProcessRegistry;
pub use runner::{CommandHandle, CommandRunner, SPAWN_FAILED_MESSAGE};
