//! 终端模块错误类型
//!
//! 定义命令执行、PTY 句柄与时间线操作相关的错误类型。
//!
//! ## 功能
//! - PTY 创建 / 写入 / 调整大小错误
//! - 进程句柄与块查找错误
//! - 序列化支持

use thiserror::Error;

/// 终端错误类型
#[derive(Debug, Error)]
pub enum TerminalError {
    /// 进程句柄不存在（已被移除或从未注册）
    #[error("进程不存在: {0}")]
    ProcessNotFound(String),

    /// PTY 创建失败
    #[error("PTY 创建失败: {0}")]
    PtyCreationFailed(String),

    /// 写入失败
    #[error("写入失败: {0}")]
    WriteFailed(String),

    /// 调整大小失败
    #[error("调整大小失败: {0}")]
    ResizeFailed(String),

    /// 进程已退出
    #[error("进程已退出")]
    ProcessExited,

    /// 块不存在
    #[error("块不存在: {0}")]
    BlockNotFound(String),

    /// 空命令
    #[error("命令为空")]
    EmptyCommand,

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<TerminalError> for String {
    fn from(err: TerminalError) -> Self {
        err.to_string()
    }
}

impl serde::Serialize for TerminalError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
