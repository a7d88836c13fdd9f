//! AI 代理后端类型
//!
//! 三种会话管理方式对应三种后端。

use serde::{Deserialize, Serialize};

/// 代理后端枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentBackend {
    /// 常驻双向进程（stream-json 协议）
    #[default]
    Persistent,
    /// 每回合一个进程（JSONL 事件协议）
    OneShot,
    /// 本地任务队列服务（请求/响应）
    JobQueue,
}

impl std::fmt::Display for AgentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentBackend::Persistent => write!(f, "persistent"),
            AgentBackend::OneShot => write!(f, "one_shot"),
            AgentBackend::JobQueue => write!(f, "job_queue"),
        }
    }
}

impl std::str::FromStr for AgentBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "persistent" | "claude" => Ok(AgentBackend::Persistent),
            "one_shot" | "one-shot" | "oneshot" | "codex" => Ok(AgentBackend::OneShot),
            "job_queue" | "job-queue" | "jobqueue" | "opencode" => Ok(AgentBackend::JobQueue),
            _ => Err(format!("Invalid agent backend: {s}")),
        }
    }
}
