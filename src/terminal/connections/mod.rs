//! PTY 连接模块
//!
//! 定义 PTY 启动契约与进程句柄接口，并提供本地 PTY 实现。
//!
//! ## 模块结构
//! - `local_pty` - 基于 portable-pty 的本地实现
//! - `testing` - 测试用的脚本化 PTY（仅测试）
//!
//! ## 功能
//! - `PtySpawner`: 按请求启动 PTY 子进程
//! - `PtyHandle`: 写入、调整大小、终止
//! - `PtyEvent`: 输出数据与退出事件

pub mod local_pty;
#[cfg(test)]
pub mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::terminal::error::TerminalError;

pub use local_pty::LocalPtySpawner;

/// 事件通道容量
pub const PTY_EVENT_CHANNEL_CAPACITY: usize = 256;

/// 终端大小
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TermSize {
    /// 行数
    pub rows: u16,
    /// 列数
    pub cols: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// PTY 启动请求
#[derive(Debug, Clone, PartialEq)]
pub struct PtySpawnRequest {
    /// 日志标识（块 ID）
    pub label: String,
    /// Shell 路径
    pub shell: String,
    /// Shell 参数
    pub args: Vec<String>,
    /// 工作目录
    pub cwd: PathBuf,
    /// 覆盖的环境变量
    pub env: Vec<(String, String)>,
    /// 终端大小
    pub size: TermSize,
}

/// PTY 事件
#[derive(Debug, Clone, PartialEq)]
pub enum PtyEvent {
    /// 原始输出
    Data(Vec<u8>),
    /// 进程退出
    Exit(i32),
}

/// PTY 进程句柄
pub trait PtyHandle: Send + Sync {
    /// 写入数据
    fn write(&self, data: &[u8]) -> Result<(), TerminalError>;

    /// 调整大小
    fn resize(&self, size: TermSize) -> Result<(), TerminalError>;

    /// 终止进程（已退出时为空操作）
    fn kill(&self);

    /// 进程是否仍在运行
    fn is_alive(&self) -> bool;

    /// 进程 ID
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// 已启动的 PTY
pub struct SpawnedPty {
    pub handle: Arc<dyn PtyHandle>,
    /// 输出与退出事件，退出事件之后通道关闭
    pub events: mpsc::Receiver<PtyEvent>,
}

/// PTY 启动器
pub trait PtySpawner: Send + Sync {
    fn spawn(&self, request: PtySpawnRequest) -> Result<SpawnedPty, TerminalError>;
}
