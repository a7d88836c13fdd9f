//! 核心类型模块
//!
//! 包含纯数据类型（models）与引擎配置（config）
//!
//! 本 crate 不包含任何业务逻辑，只提供基础类型定义。

pub mod config;
pub mod models;

// 重新导出常用类型
pub use config::{ConfigError, EngineConfig};
pub use models::*;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
