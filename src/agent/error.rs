//! Agent 模块错误类型
//!
//! 流式回合本身不返回错误（失败转换为 `Chunk::Error`），
//! 这里的错误用于会话管理、历史加载等请求-响应操作。

use thiserror::Error;

/// Agent 错误类型
#[derive(Debug, Error)]
pub enum AgentError {
    /// 子进程启动失败
    #[error("代理进程启动失败: {0}")]
    SpawnFailed(String),

    /// 写入子进程失败
    #[error("写入代理进程失败: {0}")]
    WriteFailed(String),

    /// 子进程已退出
    #[error("代理进程已退出")]
    ProcessExited,

    /// HTTP 请求失败
    #[error("HTTP 请求失败: {0}")]
    Http(String),

    /// 协议错误（响应格式不符合预期）
    #[error("协议错误: {0}")]
    Protocol(String),

    /// 会话不存在
    #[error("会话不存在: {0}")]
    SessionNotFound(String),

    /// 任务不存在
    #[error("任务不存在: {0}")]
    JobNotFound(String),

    /// 超时
    #[error("等待超时: {0}")]
    Timeout(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AgentError::Timeout(err.to_string())
        } else if err.is_decode() {
            AgentError::Protocol(err.to_string())
        } else {
            AgentError::Http(err.to_string())
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::WriteFailed(err.to_string())
    }
}

impl From<AgentError> for String {
    fn from(err: AgentError) -> Self {
        err.to_string()
    }
}

impl serde::Serialize for AgentError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
