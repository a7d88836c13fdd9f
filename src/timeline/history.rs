//! 会话历史回填
//!
//! 从代理会话历史重建 AI 响应块，并按页向时间线前部追加。
//!
//! ## 功能
//! - 用户消息与助手消息配对（助手消息取最近的未配对用户消息）
//! - 仅含工具调用的助手消息并入前一个同模型同提供方的块
//! - 分页游标：已加载数量、总数、是否还有更早的消息
//! - 跨页边界补全提示与合并，按 ID 去重

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use infinitty_core::{AgentBackend, AiResponseBlock, Block, ToolCall, TurnStats};

use super::store::Timeline;
use crate::agent::AgentError;

/// 历史块 ID 前缀
pub const HISTORY_ID_PREFIX: &str = "history-";

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// 历史消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub id: String,
    pub role: HistoryRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub stats: Option<TurnStats>,
    #[serde(default)]
    pub created_at: i64,
}

/// 一页历史消息（按时间顺序）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryPage {
    pub messages: Vec<HistoryMessage>,
    /// 会话消息总数
    pub total: usize,
}

/// 历史来源
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// 获取消息
    ///
    /// # 参数
    /// - `limit`: 最多返回的消息数
    /// - `offset`: 从最新消息起跳过的数量
    async fn fetch_messages(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<HistoryPage, AgentError>;
}

/// 分页游标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationCursor {
    pub session_id: String,
    pub loaded: usize,
    pub total: usize,
}

impl PaginationCursor {
    pub fn has_more(&self) -> bool {
        self.loaded < self.total
    }
}

/// 重建后的一页
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconstructedPage {
    pub blocks: Vec<Block>,
    /// 页尾未配对的用户消息（按时间顺序），用于补全更新一页的首个块
    pub trailing_prompts: Vec<String>,
}

/// 从消息重建块
pub fn reconstruct(messages: &[HistoryMessage], backend: AgentBackend) -> ReconstructedPage {
    let mut blocks: Vec<AiResponseBlock> = Vec::new();
    let mut unpaired: Vec<&HistoryMessage> = Vec::new();
    let mut trailing_start = 0;

    for msg in messages {
        match msg.role {
            HistoryRole::User => unpaired.push(msg),
            HistoryRole::Assistant => {
                let tool_only = msg.content.trim().is_empty() && !msg.tool_calls.is_empty();
                if tool_only && unpaired.is_empty() {
                    if let Some(prev) = blocks.last_mut() {
                        if prev.model == msg.model.clone().unwrap_or_default()
                            && prev.provider == msg.provider
                        {
                            prev.tool_calls.extend(msg.tool_calls.iter().cloned());
                            continue;
                        }
                    }
                }
                let prompt = unpaired
                    .pop()
                    .map(|u| u.content.clone())
                    .unwrap_or_default();
                blocks.push(history_block(msg, prompt, backend));
                trailing_start = unpaired.len();
            }
        }
    }

    ReconstructedPage {
        blocks: blocks.into_iter().map(Block::AiResponse).collect(),
        trailing_prompts: unpaired[trailing_start..]
            .iter()
            .map(|u| u.content.clone())
            .collect(),
    }
}

fn history_block(msg: &HistoryMessage, prompt: String, backend: AgentBackend) -> AiResponseBlock {
    AiResponseBlock {
        id: format!("{HISTORY_ID_PREFIX}{}", msg.id),
        prompt,
        response: msg.content.clone(),
        model: msg.model.clone().unwrap_or_default(),
        provider: msg.provider.clone(),
        backend,
        is_streaming: false,
        thinking: msg.thinking.clone(),
        stats: msg.stats.clone(),
        tool_calls: msg.tool_calls.clone(),
        timed_out: false,
        created_at: msg.created_at,
    }
}

/// 把一页更早的块合并到时间线前部
///
/// # 返回
/// 新插入的块数
pub fn prepend_page(existing: &mut Vec<Block>, page: ReconstructedPage) -> usize {
    let ReconstructedPage {
        blocks: mut page_blocks,
        trailing_prompts: mut prompts,
    } = page;

    let existing_ids: HashSet<String> = existing.iter().map(|b| b.id().to_string()).collect();
    page_blocks.retain(|b| !existing_ids.contains(b.id()));

    // 边界处理：更新一页开头缺少提示的历史块
    let mut i = 0;
    while i < existing.len() {
        let Some(block) = existing[i].as_ai_response_mut() else {
            break;
        };
        if !block.id.starts_with(HISTORY_ID_PREFIX) || !block.prompt.is_empty() {
            break;
        }
        if let Some(prompt) = prompts.pop() {
            block.prompt = prompt;
            i += 1;
            continue;
        }
        if !block.is_tool_only() {
            break;
        }
        let merged = match page_blocks.last_mut().and_then(Block::as_ai_response_mut) {
            Some(last) if last.model == block.model && last.provider == block.provider => {
                last.tool_calls.append(&mut block.tool_calls);
                true
            }
            _ => false,
        };
        if !merged {
            break;
        }
        existing.remove(i);
    }

    let inserted = page_blocks.len();
    page_blocks.append(existing);
    *existing = page_blocks;
    inserted
}

/// 历史加载器
pub struct HistoryLoader {
    source: Arc<dyn HistorySource>,
    page_size: usize,
    backend: AgentBackend,
    lock: tokio::sync::Mutex<()>,
}

impl HistoryLoader {
    pub fn new(source: Arc<dyn HistorySource>, page_size: usize, backend: AgentBackend) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            backend,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 加载会话最近的一页
    ///
    /// # 返回
    /// 新插入的块数
    pub async fn load_initial(
        &self,
        timeline: &Timeline,
        session_id: &str,
    ) -> Result<usize, AgentError> {
        let _guard = self.lock.lock().await;
        let page = self
            .source
            .fetch_messages(session_id, self.page_size, 0)
            .await?;
        let loaded = page.messages.len();
        let inserted = timeline.prepend_history(reconstruct(&page.messages, self.backend));
        timeline.set_cursor(Some(PaginationCursor {
            session_id: session_id.to_string(),
            loaded,
            total: page.total.max(loaded),
        }));
        tracing::info!(
            "[HistoryLoader] 加载历史: key={}, session_id={}, loaded={}, total={}, inserted={}",
            timeline.key(),
            session_id,
            loaded,
            page.total,
            inserted
        );
        Ok(inserted)
    }

    /// 加载更早的一页
    ///
    /// 没有游标或已全部加载时返回 0。
    pub async fn load_older(&self, timeline: &Timeline) -> Result<usize, AgentError> {
        let _guard = self.lock.lock().await;
        let Some(mut cursor) = timeline.cursor() else {
            return Ok(0);
        };
        if !cursor.has_more() {
            return Ok(0);
        }

        let page = self
            .source
            .fetch_messages(&cursor.session_id, self.page_size, cursor.loaded)
            .await?;
        if page.messages.is_empty() {
            cursor.total = cursor.loaded;
            timeline.set_cursor(Some(cursor));
            return Ok(0);
        }

        cursor.loaded += page.messages.len();
        cursor.total = page.total.max(cursor.loaded);
        let inserted = timeline.prepend_history(reconstruct(&page.messages, self.backend));
        tracing::info!(
            "[HistoryLoader] 加载更早历史: key={}, loaded={}, total={}, inserted={}",
            timeline.key(),
            cursor.loaded,
            cursor.total,
            inserted
        );
        timeline.set_cursor(Some(cursor));
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infinitty_core::ToolStatus;

    fn user(id: &str, content: &str, t: i64) -> HistoryMessage {
        HistoryMessage {
            id: id.to_string(),
            role: HistoryRole::User,
            content: content.to_string(),
            model: None,
            provider: None,
            tool_calls: Vec::new(),
            thinking: None,
            stats: None,
            created_at: t,
        }
    }

    fn assistant(id: &str, content: &str, t: i64) -> HistoryMessage {
        HistoryMessage {
            role: HistoryRole::Assistant,
            model: Some("sonnet".to_string()),
            provider: Some("anthropic".to_string()),
            ..user(id, content, t)
        }
    }

    fn tool_only(id: &str, tool: &str, t: i64) -> HistoryMessage {
        let mut call = ToolCall::running(format!("call-{id}"), tool, None);
        call.status = ToolStatus::Completed;
        HistoryMessage {
            tool_calls: vec![call],
            ..assistant(id, "", t)
        }
    }

    fn ai(block: &Block) -> &AiResponseBlock {
        block.as_ai_response().unwrap()
    }

    /// 内存历史来源（消息按时间顺序保存）
    struct MemorySource {
        messages: Vec<HistoryMessage>,
    }

    #[async_trait]
    impl HistorySource for MemorySource {
        async fn fetch_messages(
            &self,
            _session_id: &str,
            limit: usize,
            offset: usize,
        ) -> Result<HistoryPage, AgentError> {
            let total = self.messages.len();
            let end = total.saturating_sub(offset);
            let start = end.saturating_sub(limit);
            Ok(HistoryPage {
                messages: self.messages[start..end].to_vec(),
                total,
            })
        }
    }

    #[test]
    fn test_pairs_with_nearest_unpaired_user() {
        let messages = vec![
            user("u1", "first", 1),
            user("u2", "second", 2),
            assistant("a1", "answer one", 3),
            assistant("a2", "answer two", 4),
        ];
        let page = reconstruct(&messages, AgentBackend::JobQueue);
        assert_eq!(page.blocks.len(), 2);
        assert_eq!(ai(&page.blocks[0]).prompt, "second");
        assert_eq!(ai(&page.blocks[1]).prompt, "first");
        assert_eq!(ai(&page.blocks[0]).id, "history-a1");
        assert!(!ai(&page.blocks[0]).is_streaming);
        assert!(page.trailing_prompts.is_empty());
    }

    #[test]
    fn test_tool_only_turn_merges_into_previous() {
        let messages = vec![
            user("u1", "fix it", 1),
            assistant("a1", "looking", 2),
            tool_only("a2", "Read", 3),
            tool_only("a3", "Edit", 4),
        ];
        let page = reconstruct(&messages, AgentBackend::JobQueue);
        assert_eq!(page.blocks.len(), 1);
        let names: Vec<&str> = ai(&page.blocks[0])
            .tool_calls
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["Read", "Edit"]);
    }

    #[test]
    fn test_tool_only_with_different_model_is_separate() {
        let mut other = tool_only("a2", "Read", 3);
        other.model = Some("opus".to_string());
        let messages = vec![user("u1", "q", 1), assistant("a1", "x", 2), other];
        let page = reconstruct(&messages, AgentBackend::JobQueue);
        assert_eq!(page.blocks.len(), 2);
        assert!(ai(&page.blocks[1]).is_tool_only());
    }

    #[test]
    fn test_trailing_prompts_fill_next_page() {
        let older = reconstruct(
            &[user("u0", "old q", 1), assistant("a0", "old a", 2), user("u1", "new q", 3)],
            AgentBackend::JobQueue,
        );
        assert_eq!(older.trailing_prompts, vec!["new q"]);

        let newer = reconstruct(&[assistant("a1", "new a", 4)], AgentBackend::JobQueue);
        let mut blocks = newer.blocks;
        assert_eq!(ai(&blocks[0]).prompt, "");

        let inserted = prepend_page(&mut blocks, older);
        assert_eq!(inserted, 1);
        assert_eq!(blocks.len(), 2);
        assert_eq!(ai(&blocks[0]).prompt, "old q");
        assert_eq!(ai(&blocks[1]).prompt, "new q");
    }

    #[test]
    fn test_tool_only_merges_across_page_boundary() {
        let older = reconstruct(
            &[user("u0", "q", 1), assistant("a0", "a", 2)],
            AgentBackend::JobQueue,
        );
        let newer = reconstruct(
            &[tool_only("a1", "Bash", 3), assistant("a2", "done", 4)],
            AgentBackend::JobQueue,
        );
        let mut blocks = newer.blocks;
        assert_eq!(blocks.len(), 2);

        prepend_page(&mut blocks, older);
        assert_eq!(blocks.len(), 2);
        assert_eq!(ai(&blocks[0]).id, "history-a0");
        assert_eq!(ai(&blocks[0]).tool_calls.len(), 1);
        assert_eq!(ai(&blocks[1]).id, "history-a2");
    }

    #[test]
    fn test_prepend_twice_has_no_duplicates() {
        let messages = vec![user("u1", "q", 1), assistant("a1", "a", 2)];
        let mut blocks = Vec::new();
        prepend_page(&mut blocks, reconstruct(&messages, AgentBackend::JobQueue));
        let inserted = prepend_page(&mut blocks, reconstruct(&messages, AgentBackend::JobQueue));
        assert_eq!(inserted, 0);
        assert_eq!(blocks.len(), 1);
    }

    #[tokio::test]
    async fn test_loader_pages_backwards_in_order() {
        let mut messages = Vec::new();
        for i in 0..5 {
            messages.push(user(&format!("u{i}"), &format!("q{i}"), i * 2));
            messages.push(assistant(&format!("a{i}"), &format!("r{i}"), i * 2 + 1));
        }
        let loader = HistoryLoader::new(
            Arc::new(MemorySource { messages }),
            4,
            AgentBackend::JobQueue,
        );
        let timeline = Timeline::new("tab", "/", 500);

        assert_eq!(loader.load_initial(&timeline, "s1").await.unwrap(), 2);
        let cursor = timeline.cursor().unwrap();
        assert_eq!((cursor.loaded, cursor.total), (4, 10));
        assert!(cursor.has_more());

        loader.load_older(&timeline).await.unwrap();
        loader.load_older(&timeline).await.unwrap();
        assert!(!timeline.cursor().unwrap().has_more());
        assert_eq!(loader.load_older(&timeline).await.unwrap(), 0);

        let blocks = timeline.blocks();
        let prompts: Vec<&str> = blocks.iter().map(|b| ai(b).prompt.as_str()).collect();
        assert_eq!(prompts, vec!["q0", "q1", "q2", "q3", "q4"]);
        let times: Vec<i64> = blocks.iter().map(Block::created_at).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }
}
