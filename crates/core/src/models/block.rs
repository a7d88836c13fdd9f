//! 时间线块类型定义
//!
//! 时间线由异构块组成，`Block` 是封闭的和类型，每种块一个变体。
//!
//! ## 功能
//! - 命令块 / 交互块 / AI 响应块 / 错误块 / 系统块 / 工具输出块
//! - 活跃状态判定（驱逐策略使用）
//! - 创建时间排序键

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent_backend::AgentBackend;
use super::chunk::TurnStats;
use super::tool_call::ToolCall;

/// 块 ID
pub type BlockId = String;

/// 生成新的块 ID
pub fn new_block_id() -> BlockId {
    Uuid::new_v4().to_string()
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 短命令块（在独立 PTY 中执行并捕获输出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandBlock {
    pub id: BlockId,
    pub command: String,
    /// 清洗后的输出
    pub output: String,
    pub exit_code: Option<i32>,
    pub is_running: bool,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub cwd: PathBuf,
    #[serde(default)]
    pub dismissed: bool,
    pub created_at: i64,
}

impl CommandBlock {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        let now = now_millis();
        Self {
            id: new_block_id(),
            command: command.into(),
            output: String::new(),
            exit_code: None,
            is_running: true,
            started_at: now,
            ended_at: None,
            cwd: cwd.into(),
            dismissed: false,
            created_at: now,
        }
    }
}

/// 交互式命令块（完整 PTY 会话，由界面层渲染）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveBlock {
    pub id: BlockId,
    pub command: String,
    pub cwd: PathBuf,
    pub is_running: bool,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub dismissed: bool,
    pub created_at: i64,
}

impl InteractiveBlock {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            id: new_block_id(),
            command: command.into(),
            cwd: cwd.into(),
            is_running: true,
            exit_code: None,
            dismissed: false,
            created_at: now_millis(),
        }
    }
}

/// AI 响应块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponseBlock {
    pub id: BlockId,
    pub prompt: String,
    pub response: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub backend: AgentBackend,
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<TurnStats>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// 回合因等待超时而结束
    #[serde(default)]
    pub timed_out: bool,
    pub created_at: i64,
}

impl AiResponseBlock {
    /// 创建流式中的 AI 响应块
    pub fn streaming(
        prompt: impl Into<String>,
        model: impl Into<String>,
        backend: AgentBackend,
    ) -> Self {
        Self {
            id: new_block_id(),
            prompt: prompt.into(),
            response: String::new(),
            model: model.into(),
            provider: None,
            backend,
            is_streaming: true,
            thinking: None,
            stats: None,
            tool_calls: Vec::new(),
            timed_out: false,
            created_at: now_millis(),
        }
    }

    /// 仅包含工具调用（无提示、无响应文本）
    pub fn is_tool_only(&self) -> bool {
        self.prompt.trim().is_empty()
            && self.response.trim().is_empty()
            && !self.tool_calls.is_empty()
    }
}

/// 错误块 / 系统块的消息体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBlock {
    pub id: BlockId,
    pub message: String,
    pub created_at: i64,
}

impl MessageBlock {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: new_block_id(),
            message: message.into(),
            created_at: now_millis(),
        }
    }
}

/// 独立展示的工具输出块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutputBlock {
    pub id: BlockId,
    /// 所属 AI 响应块
    pub parent_id: BlockId,
    pub tool_call: ToolCall,
    pub created_at: i64,
}

impl ToolOutputBlock {
    pub fn new(parent_id: impl Into<BlockId>, tool_call: ToolCall) -> Self {
        Self {
            id: new_block_id(),
            parent_id: parent_id.into(),
            tool_call,
            created_at: now_millis(),
        }
    }
}

/// 块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockKind {
    Command,
    Interactive,
    AiResponse,
    Error,
    System,
    ToolOutput,
}

/// 时间线块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Block {
    Command(CommandBlock),
    Interactive(InteractiveBlock),
    AiResponse(AiResponseBlock),
    Error(MessageBlock),
    System(MessageBlock),
    ToolOutput(ToolOutputBlock),
}

impl Block {
    pub fn error(message: impl Into<String>) -> Self {
        Block::Error(MessageBlock::new(message))
    }

    pub fn system(message: impl Into<String>) -> Self {
        Block::System(MessageBlock::new(message))
    }

    pub fn id(&self) -> &str {
        match self {
            Block::Command(b) => &b.id,
            Block::Interactive(b) => &b.id,
            Block::AiResponse(b) => &b.id,
            Block::Error(b) | Block::System(b) => &b.id,
            Block::ToolOutput(b) => &b.id,
        }
    }

    pub fn created_at(&self) -> i64 {
        match self {
            Block::Command(b) => b.created_at,
            Block::Interactive(b) => b.created_at,
            Block::AiResponse(b) => b.created_at,
            Block::Error(b) | Block::System(b) => b.created_at,
            Block::ToolOutput(b) => b.created_at,
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Command(_) => BlockKind::Command,
            Block::Interactive(_) => BlockKind::Interactive,
            Block::AiResponse(_) => BlockKind::AiResponse,
            Block::Error(_) => BlockKind::Error,
            Block::System(_) => BlockKind::System,
            Block::ToolOutput(_) => BlockKind::ToolOutput,
        }
    }

    /// 是否为活跃块
    ///
    /// 运行中的命令、未关闭的交互块、流式中的 AI 响应为活跃块，
    /// 活跃块不会被驱逐。
    pub fn is_active(&self) -> bool {
        match self {
            Block::Command(b) => b.is_running,
            Block::Interactive(b) => b.is_running && !b.dismissed,
            Block::AiResponse(b) => b.is_streaming,
            _ => false,
        }
    }

    pub fn as_ai_response(&self) -> Option<&AiResponseBlock> {
        match self {
            Block::AiResponse(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_ai_response_mut(&mut self) -> Option<&mut AiResponseBlock> {
        match self {
            Block::AiResponse(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_command(&self) -> Option<&CommandBlock> {
        match self {
            Block::Command(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_command_mut(&mut self) -> Option<&mut CommandBlock> {
        match self {
            Block::Command(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_interactive_mut(&mut self) -> Option<&mut InteractiveBlock> {
        match self {
            Block::Interactive(b) => Some(b),
            _ => None,
        }
    }
}

impl From<CommandBlock> for Block {
    fn from(b: CommandBlock) -> Self {
        Block::Command(b)
    }
}

impl From<InteractiveBlock> for Block {
    fn from(b: InteractiveBlock) -> Self {
        Block::Interactive(b)
    }
}

impl From<AiResponseBlock> for Block {
    fn from(b: AiResponseBlock) -> Self {
        Block::AiResponse(b)
    }
}

impl From<ToolOutputBlock> for Block {
    fn from(b: ToolOutputBlock) -> Self {
        Block::ToolOutput(b)
    }
}
