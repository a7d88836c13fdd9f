//! 日志初始化

use std::str::FromStr;

use infinitty_core::config::LoggingConfig;
use tracing::Level;

/// 安装 fmt 订阅器
///
/// 重复调用时保留已安装的订阅器。
///
/// # 返回
/// 本次调用是否安装成功
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let level = Level::from_str(config.level.trim()).unwrap_or_else(|_| {
        eprintln!("[Logging] 无效的日志级别 {:?}，使用 info", config.level);
        Level::INFO
    });

    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(config.ansi)
        .with_target(false)
        .try_init()
        .is_ok();
    if installed {
        tracing::info!("[Logging] 日志已初始化: level={}", level);
    }
    installed
}
