//! AI Agent 会话模块
//!
//! 三种后端统一为"一个回合 = 一条 `Chunk` 流"的契约。
//!
//! ## 架构设计
//! - persistent - 常驻子进程，stream-json 双向通信，回合串行
//! - one_shot - 每回合一个子进程，JSONL 输出
//! - job_queue - 本地 HTTP 任务队列服务，提交后轮询
//! - stream_json / jsonl_events - 各自的行协议解析
//!
//! 每条流以 `Chunk::Error` 或 `Chunk::Done` 结束；启动失败、解析失败
//! 都在管理器内部转换为块或日志，不会越过流边界。

pub mod error;
pub mod job_queue;
pub mod jsonl_events;
pub mod one_shot;
pub mod persistent;
pub mod stream_json;

use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use infinitty_core::{AgentBackend, Chunk};

pub use error::AgentError;
pub use job_queue::{HttpJobQueueClient, JobPoll, JobQueueAgentManager, JobQueueClient};
pub use one_shot::OneShotAgentManager;
pub use persistent::PersistentAgentManager;

/// 一个回合的块流
pub type ChunkStream = BoxStream<'static, Chunk>;

/// 回合选项
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOptions {
    /// 思考 token 预算
    #[serde(default)]
    pub thinking_budget: Option<u32>,
    /// 指定会话（任务队列后端）
    #[serde(default)]
    pub session_id: Option<String>,
}

/// 回合请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub prompt: String,
    pub model: String,
    pub cwd: PathBuf,
    #[serde(default)]
    pub options: TurnOptions,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            cwd: cwd.into(),
            options: TurnOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TurnOptions) -> Self {
        self.options = options;
        self
    }
}

/// 代理会话
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// 后端类型
    fn backend(&self) -> AgentBackend;

    /// 发起一个回合
    ///
    /// 丢弃返回的流即放弃该回合。
    fn stream_turn(&self, request: TurnRequest) -> ChunkStream;

    /// 释放后端资源（终止子进程等）
    async fn shutdown(&self) {}
}
