//! 时间线块存储
//!
//! 每个持久化键对应一条 `Timeline`，保存有序块列表、当前目录与分页游标。
//!
//! ## 功能
//! - append / update / remove / get，每次追加后执行驱逐
//! - 完成标记：标记后的块不再接受后续修改
//! - 关闭块（dismiss）：幂等，默认退出码 130
//! - 历史回填前插
//! - `watch` 版本号供观察者感知变化

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use infinitty_core::{AiResponseBlock, Block, BlockId, CommandBlock};

use super::eviction::evict;
use super::history::{prepend_page, PaginationCursor, ReconstructedPage};

/// 关闭块的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissOutcome {
    /// 已关闭，调用方应终止对应进程
    Dismissed,
    /// 之前已关闭
    AlreadyDismissed,
    /// 该类型的块不支持关闭
    NotDismissable,
    NotFound,
}

struct TimelineState {
    blocks: Vec<Block>,
    cwd: PathBuf,
    completed: HashSet<BlockId>,
    cursor: Option<PaginationCursor>,
}

/// 一条时间线
pub struct Timeline {
    key: String,
    max_blocks: usize,
    state: RwLock<TimelineState>,
    version: watch::Sender<u64>,
}

impl Timeline {
    pub fn new(key: impl Into<String>, cwd: impl Into<PathBuf>, max_blocks: usize) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            key: key.into(),
            max_blocks,
            state: RwLock::new(TimelineState {
                blocks: Vec::new(),
                cwd: cwd.into(),
                completed: HashSet::new(),
                cursor: None,
            }),
            version,
        }
    }

    /// 持久化键
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 订阅变更版本号
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// 当前版本号（每次修改递增）
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// 追加块并执行驱逐
    ///
    /// # 返回
    /// 被驱逐的块 ID
    pub fn append(&self, block: Block) -> Vec<BlockId> {
        let evicted = {
            let mut state = self.state.write();
            state.blocks.push(block);
            let blocks = std::mem::take(&mut state.blocks);
            let (kept, evicted) = evict(blocks, self.max_blocks);
            state.blocks = kept;

            let ids: Vec<BlockId> = evicted.iter().map(|b| b.id().to_string()).collect();
            for id in &ids {
                state.completed.remove(id);
            }
            ids
        };
        if !evicted.is_empty() {
            tracing::debug!(
                "[Timeline] 驱逐块: key={}, count={}",
                self.key,
                evicted.len()
            );
        }
        self.bump();
        evicted
    }

    /// 修改块
    ///
    /// 块不存在或已标记完成时不修改。
    ///
    /// # 返回
    /// 是否执行了修改
    pub fn update(&self, id: &str, f: impl FnOnce(&mut Block)) -> bool {
        let applied = {
            let mut state = self.state.write();
            if state.completed.contains(id) {
                false
            } else if let Some(block) = state.blocks.iter_mut().find(|b| b.id() == id) {
                f(block);
                true
            } else {
                false
            }
        };
        if applied {
            self.bump();
        }
        applied
    }

    /// 修改 AI 响应块
    pub fn update_ai(&self, id: &str, f: impl FnOnce(&mut AiResponseBlock)) -> bool {
        self.update(id, |block| {
            if let Some(ai) = block.as_ai_response_mut() {
                f(ai);
            }
        })
    }

    /// 修改命令块
    pub fn update_command(&self, id: &str, f: impl FnOnce(&mut CommandBlock)) -> bool {
        self.update(id, |block| {
            if let Some(cmd) = block.as_command_mut() {
                f(cmd);
            }
        })
    }

    /// 最后一次修改并标记完成
    ///
    /// 与 `update` 在同一把锁内完成，之后的修改全部被忽略。
    pub fn complete(&self, id: &str, f: impl FnOnce(&mut Block)) -> bool {
        let applied = {
            let mut state = self.state.write();
            if state.completed.contains(id) {
                false
            } else if let Some(block) = state.blocks.iter_mut().find(|b| b.id() == id) {
                f(block);
                state.completed.insert(id.to_string());
                true
            } else {
                false
            }
        };
        if applied {
            self.bump();
        }
        applied
    }

    /// 是否已标记完成
    pub fn is_completed(&self, id: &str) -> bool {
        self.state.read().completed.contains(id)
    }

    /// 关闭命令块或交互块
    ///
    /// 设置 dismissed、停止运行；没有观察到退出码时使用 `default_exit_code`。
    pub fn dismiss(&self, id: &str, default_exit_code: i32) -> DismissOutcome {
        let outcome = {
            let mut state = self.state.write();
            let Some(block) = state.blocks.iter_mut().find(|b| b.id() == id) else {
                return DismissOutcome::NotFound;
            };
            let outcome = match block {
                Block::Command(b) if b.dismissed => DismissOutcome::AlreadyDismissed,
                Block::Command(b) => {
                    b.dismissed = true;
                    b.is_running = false;
                    b.exit_code = b.exit_code.or(Some(default_exit_code));
                    b.ended_at = b.ended_at.or(Some(Utc::now().timestamp_millis()));
                    DismissOutcome::Dismissed
                }
                Block::Interactive(b) if b.dismissed => DismissOutcome::AlreadyDismissed,
                Block::Interactive(b) => {
                    b.dismissed = true;
                    b.is_running = false;
                    b.exit_code = b.exit_code.or(Some(default_exit_code));
                    DismissOutcome::Dismissed
                }
                _ => DismissOutcome::NotDismissable,
            };
            if outcome == DismissOutcome::Dismissed {
                state.completed.insert(id.to_string());
            }
            outcome
        };
        if outcome == DismissOutcome::Dismissed {
            tracing::info!("[Timeline] 关闭块: key={}, block_id={}", self.key, id);
            self.bump();
        }
        outcome
    }

    /// 删除块
    pub fn remove(&self, id: &str) -> Option<Block> {
        let removed = {
            let mut state = self.state.write();
            let pos = state.blocks.iter().position(|b| b.id() == id)?;
            state.completed.remove(id);
            Some(state.blocks.remove(pos))
        };
        self.bump();
        removed
    }

    /// 获取块快照
    pub fn get(&self, id: &str) -> Option<Block> {
        self.state
            .read()
            .blocks
            .iter()
            .find(|b| b.id() == id)
            .cloned()
    }

    /// 获取全部块快照
    pub fn blocks(&self) -> Vec<Block> {
        self.state.read().blocks.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().blocks.is_empty()
    }

    /// 拥有运行中进程的块 ID
    pub fn running_process_ids(&self) -> Vec<BlockId> {
        self.state
            .read()
            .blocks
            .iter()
            .filter(|b| match b {
                Block::Command(c) => c.is_running,
                Block::Interactive(i) => i.is_running,
                _ => false,
            })
            .map(|b| b.id().to_string())
            .collect()
    }

    /// 当前目录
    pub fn cwd(&self) -> PathBuf {
        self.state.read().cwd.clone()
    }

    pub fn set_cwd(&self, cwd: impl Into<PathBuf>) {
        self.state.write().cwd = cwd.into();
        self.bump();
    }

    /// 分页游标
    pub fn cursor(&self) -> Option<PaginationCursor> {
        self.state.read().cursor.clone()
    }

    pub fn set_cursor(&self, cursor: Option<PaginationCursor>) {
        self.state.write().cursor = cursor;
    }

    /// 前插历史块（不触发驱逐）
    pub fn prepend_history(&self, page: ReconstructedPage) -> usize {
        let inserted = {
            let mut state = self.state.write();
            prepend_page(&mut state.blocks, page)
        };
        self.bump();
        inserted
    }
}
