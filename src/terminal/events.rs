//! 终端事件
//!
//! 引擎通过广播通道向界面层推送事件。
//!
//! ## 功能
//! - 事件名称常量（供界面桥接使用）
//! - 目录切换 / 交互输出 / 进程退出 / 时间线关闭事件
//! - `EventBus` 广播封装

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// 事件名称常量
pub mod event_names {
    /// 目录切换事件
    pub const DIRECTORY_CHANGED: &str = "terminal:directory-changed";
    /// 交互块输出事件
    pub const INTERACTIVE_OUTPUT: &str = "terminal:interactive-output";
    /// 进程退出事件
    pub const PROCESS_EXITED: &str = "terminal:process-exited";
    /// 时间线关闭事件
    pub const TIMELINE_CLOSED: &str = "timeline:closed";
}

/// 默认广播容量
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// 目录切换事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryChangedEvent {
    /// 时间线持久化键
    pub persist_key: String,
    /// 新目录
    pub path: PathBuf,
}

/// 引擎事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum EngineEvent {
    DirectoryChanged(DirectoryChangedEvent),
    /// 交互块的原始输出（未清洗、未合并）
    InteractiveOutput {
        persist_key: String,
        block_id: String,
        data: Vec<u8>,
    },
    ProcessExited {
        persist_key: String,
        block_id: String,
        exit_code: Option<i32>,
    },
    TimelineClosed { persist_key: String },
}

impl EngineEvent {
    /// 事件名称
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::DirectoryChanged(_) => event_names::DIRECTORY_CHANGED,
            EngineEvent::InteractiveOutput { .. } => event_names::INTERACTIVE_OUTPUT,
            EngineEvent::ProcessExited { .. } => event_names::PROCESS_EXITED,
            EngineEvent::TimelineClosed { .. } => event_names::TIMELINE_CLOSED,
        }
    }
}

/// 事件总线
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 发送事件（没有订阅者时丢弃）
    pub fn emit(&self, event: EngineEvent) {
        tracing::trace!("[EventBus] 发送事件: {}", event.name());
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}
