//! 引擎配置
//!
//! 从 `~/.infinitty/config.yaml` 加载，缺失字段使用默认值。
//!
//! ## 功能
//! - 时间线驱逐上限
//! - 命令执行（刷新间隔、简单命令白名单、提示符模式、PTY 尺寸）
//! - 三种代理后端的启动参数与超时
//! - 历史分页与虚拟化参数
//! - 日志级别

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 时间线默认块数上限
pub const DEFAULT_MAX_BLOCKS: usize = 500;
/// 输出刷新间隔（毫秒）
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;
/// 常驻代理单次等待超时（秒）
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 120;
/// 关闭块时的默认退出码（SIGINT 约定）
pub const DEFAULT_DISMISS_EXIT_CODE: i32 = 130;
/// 默认提示符识别模式
pub const DEFAULT_PROMPT_PATTERN: &str = r"^.*[@:].*[%$#>]\s*$";

/// 默认简单命令白名单
pub const DEFAULT_SIMPLE_COMMANDS: &[&str] = &[
    "ls", "ll", "la", "pwd", "cd", "cat", "echo", "head", "tail", "wc", "which", "whoami", "date",
    "env", "printenv", "uname", "hostname", "id", "basename", "dirname", "realpath", "file",
    "stat", "du", "df", "tree", "type",
];

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("解析配置失败: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("无法获取主目录")]
    NoHomeDir,
}

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub timeline: TimelineConfig,
    pub runner: RunnerConfig,
    pub agents: AgentsConfig,
    pub history: HistoryConfig,
    pub virtualizer: VirtualizerConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// 默认配置文件路径
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".infinitty").join("config.yaml"))
    }

    /// 从 YAML 文件加载
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// 从 YAML 字符串解析
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// 加载默认路径的配置，文件不存在时返回默认值
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }
}

/// 时间线配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// 每条时间线最多保留的块数
    pub max_blocks: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            max_blocks: DEFAULT_MAX_BLOCKS,
        }
    }
}

/// 命令执行配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub flush_interval_ms: u64,
    /// 在捕获模式下执行的命令（按首个单词匹配）
    pub simple_commands: Vec<String>,
    pub prompt_pattern: String,
    /// 为空时使用 `$SHELL`
    pub shell: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub dismiss_exit_code: i32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            simple_commands: DEFAULT_SIMPLE_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            prompt_pattern: DEFAULT_PROMPT_PATTERN.to_string(),
            shell: None,
            cols: 120,
            rows: 40,
            dismiss_exit_code: DEFAULT_DISMISS_EXIT_CODE,
        }
    }
}

/// 代理后端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentsConfig {
    pub persistent: PersistentAgentConfig,
    pub one_shot: OneShotAgentConfig,
    pub job_queue: JobQueueConfig,
}

/// 常驻双向代理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentAgentConfig {
    pub binary: String,
    /// 放在标准参数之前的附加参数
    pub extra_args: Vec<String>,
    pub permission_mode: Option<String>,
    pub wait_timeout_secs: u64,
}

impl Default for PersistentAgentConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            extra_args: Vec::new(),
            permission_mode: Some("acceptEdits".to_string()),
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
        }
    }
}

/// 单回合代理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneShotAgentConfig {
    pub binary: String,
    pub extra_args: Vec<String>,
    pub approval_policy: String,
    pub sandbox: String,
    /// 写入统计信息的提供方名称
    pub provider: String,
}

impl Default for OneShotAgentConfig {
    fn default() -> Self {
        Self {
            binary: "codex".to_string(),
            extra_args: Vec::new(),
            approval_policy: "never".to_string(),
            sandbox: "workspace-write".to_string(),
            provider: "openai".to_string(),
        }
    }
}

/// 任务队列服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobQueueConfig {
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// 单个回合的最长时间
    pub turn_timeout_secs: u64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4096".to_string(),
            poll_interval_ms: 250,
            request_timeout_secs: 30,
            turn_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS * 5,
        }
    }
}

/// 历史回填配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// 每页消息数
    pub page_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { page_size: 40 }
    }
}

/// 虚拟化配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualizerConfig {
    pub buffer_px: f64,
    pub near_bottom_threshold_px: f64,
}

impl Default for VirtualizerConfig {
    fn default() -> Self {
        Self {
            buffer_px: 500.0,
            near_bottom_threshold_px: 100.0,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace / debug / info / warn / error
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}
