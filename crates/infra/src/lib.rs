//! 基础设施模块
//!
//! 包含独立的基础设施组件，不依赖业务逻辑：
//! - sanitize: 命令输出清洗
//! - jsonl: 行分隔 JSON 帧解析
//! - wait_queue: 生产者/等待者 FIFO

pub mod jsonl;
pub mod sanitize;
pub mod wait_queue;

// 重新导出常用类型
pub use jsonl::{first_str, parse_line, LineBuffer};
pub use sanitize::{clean, strip_ansi, OutputSanitizer};
pub use wait_queue::{WaitOutcome, WaitQueue};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
