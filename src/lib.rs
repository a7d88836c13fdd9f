//! Infinitty 块时间线与流式会话引擎
//!
//! ## 模块结构
//! - `terminal` - 一次性命令执行（每条命令一个 PTY）
//! - `agent` - 三种 AI 代理后端，统一为块流
//! - `timeline` - 块存储、驱逐、历史回填、虚拟化
//! - `engine` - 组合以上组件的门面
//! - `logging` - 日志初始化
//!
//! 模型与配置位于 `infinitty-core`，输出清洗与行协议工具位于 `infinitty-infra`。

pub mod agent;
pub mod engine;
pub mod logging;
pub mod terminal;
pub mod timeline;

pub use agent::{AgentError, AgentSession, ChunkStream, TurnOptions, TurnRequest};
pub use engine::{Engine, EngineAgents, EngineParts};
pub use infinitty_core::{
    AgentBackend, AiResponseBlock, Block, BlockId, Chunk, CommandBlock, EngineConfig,
    InteractiveBlock, ToolCall, ToolStatus, TurnStats,
};
pub use logging::init_tracing;
pub use terminal::{CommandMode, EngineEvent, TerminalError};
pub use timeline::{DismissOutcome, Timeline, Virtualizer};
