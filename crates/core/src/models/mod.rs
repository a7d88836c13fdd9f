//! 数据模型
//!
//! 时间线块、工具调用、规范化流式块与代理后端类型。

pub mod agent_backend;
pub mod block;
pub mod chunk;
pub mod tool_call;

pub use agent_backend::AgentBackend;
pub use block::{
    new_block_id, AiResponseBlock, Block, BlockId, BlockKind, CommandBlock, InteractiveBlock,
    MessageBlock, ToolOutputBlock,
};
pub use chunk::{Chunk, TurnStats};
pub use tool_call::{ToolCall, ToolStatus};
