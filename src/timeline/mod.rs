//! 块时间线模块
//!
//! ## 模块结构
//! - `store` - 单条时间线的块存储
//! - `registry` - 持久化键 → 时间线
//! - `eviction` - 容量驱逐策略
//! - `history` - 会话历史回填与分页
//! - `turn` - 将代理流写入 AI 响应块
//! - `virtualizer` - 可见范围与贴底滚动

pub mod eviction;
pub mod history;
pub mod registry;
pub mod store;
pub mod turn;
pub mod virtualizer;

pub use eviction::evict;
pub use history::{
    reconstruct, HistoryLoader, HistoryMessage, HistoryPage, HistoryRole, HistorySource,
    PaginationCursor, ReconstructedPage,
};
pub use registry::SessionRegistry;
pub use store::{DismissOutcome, Timeline};
pub use turn::{apply_chunk, drive_turn};
pub use virtualizer::{estimate_height, ScrollAction, Virtualizer};
