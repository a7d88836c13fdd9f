//! AI 回合驱动
//!
//! 消费代理管理器产出的 `Chunk` 流并写入对应的 AI 响应块。
//!
//! ## 功能
//! - `apply_chunk`: 单个块对 AI 响应块的修改
//! - `drive_turn`: 逐个应用直到终止块；块被取消或删除时丢弃流

use futures::{Stream, StreamExt};

use infinitty_core::{AiResponseBlock, Chunk, ToolCall};

use super::store::Timeline;

/// 错误标记
pub const ERROR_MARKER: &str = "[error]";

/// 应用一个流式块
pub fn apply_chunk(block: &mut AiResponseBlock, chunk: &Chunk) {
    match chunk {
        Chunk::Text { content } => block.response.push_str(content),
        Chunk::Thinking { content } => {
            block.thinking.get_or_insert_with(String::new).push_str(content);
        }
        Chunk::ToolCall { id, name, input } => {
            match block.tool_calls.iter_mut().find(|c| &c.id == id) {
                Some(existing) => {
                    existing.name = name.clone();
                    if input.is_some() {
                        existing.input = input.clone();
                    }
                }
                None => block
                    .tool_calls
                    .push(ToolCall::running(id.clone(), name.clone(), input.clone())),
            }
        }
        Chunk::ToolResult {
            id,
            output,
            is_error,
        } => match block.tool_calls.iter_mut().find(|c| &c.id == id) {
            Some(call) => call.finish(output.clone(), *is_error),
            None => {
                tracing::debug!("[Turn] 工具结果没有对应的调用: block_id={}, tool_id={}", block.id, id);
            }
        },
        Chunk::Stats(stats) => {
            if let Some(model) = stats.model.as_ref().filter(|m| !m.is_empty()) {
                block.model = model.clone();
            }
            if stats.provider.is_some() {
                block.provider = stats.provider.clone();
            }
            match block.stats.as_mut() {
                Some(existing) => existing.merge(stats.clone()),
                None => block.stats = Some(stats.clone()),
            }
        }
        Chunk::Error { message } => {
            if !block.response.is_empty() {
                block.response.push_str("\n\n");
            }
            block.response.push_str(ERROR_MARKER);
            block.response.push(' ');
            block.response.push_str(message);
            block.is_streaming = false;
        }
        Chunk::Done { timed_out } => {
            block.is_streaming = false;
            block.timed_out = *timed_out;
        }
    }
}

/// 驱动一个回合
///
/// # 返回
/// 是否收到终止块（块被取消或删除时为 false）
pub async fn drive_turn<S>(timeline: &Timeline, block_id: &str, stream: S) -> bool
where
    S: Stream<Item = Chunk> + Send,
{
    futures::pin_mut!(stream);

    while let Some(chunk) = stream.next().await {
        tracing::trace!("[Turn] 收到块: block_id={}, kind={}", block_id, chunk.kind());
        if chunk.is_terminal() {
            let applied = timeline.complete(block_id, |block| {
                if let Some(ai) = block.as_ai_response_mut() {
                    apply_chunk(ai, &chunk);
                }
            });
            tracing::info!(
                "[Turn] 回合结束: block_id={}, kind={}, applied={}",
                block_id,
                chunk.kind(),
                applied
            );
            return applied;
        }
        if !timeline.update_ai(block_id, |ai| apply_chunk(ai, &chunk)) {
            tracing::info!("[Turn] 块已完成或已删除，停止回合: block_id={}", block_id);
            return false;
        }
    }

    // 流没有以终止块结束
    tracing::warn!("[Turn] 流意外结束: block_id={}", block_id);
    timeline.complete(block_id, |block| {
        if let Some(ai) = block.as_ai_response_mut() {
            ai.is_streaming = false;
        }
    });
    false
}
