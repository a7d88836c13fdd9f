//! Shell 启动环境
//!
//! 从桌面环境启动时 PATH 往往不完整，这里通过登录 shell 获取一次完整 PATH
//! 并缓存，供每次命令执行使用。
//!
//! ## 功能
//! - 解析要使用的 shell
//! - 按 shell 类型构造 `-c` 执行参数
//! - 捕获并缓存登录 shell 的 PATH
//! - 构造子进程环境变量

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Shell 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShellType {
    Bash,
    Zsh,
    Fish,
    /// PowerShell
    Pwsh,
    #[default]
    Unknown,
}

impl ShellType {
    /// 从 Shell 路径推断 Shell 类型
    pub fn from_path(path: &str) -> Self {
        let path_lower = path.to_lowercase();
        if path_lower.contains("bash") {
            Self::Bash
        } else if path_lower.contains("zsh") {
            Self::Zsh
        } else if path_lower.contains("fish") {
            Self::Fish
        } else if path_lower.contains("pwsh") || path_lower.contains("powershell") {
            Self::Pwsh
        } else {
            Self::Unknown
        }
    }

    /// 执行单条命令的参数
    pub fn command_args(&self, command: &str) -> Vec<String> {
        match self {
            Self::Pwsh => vec![
                "-NoLogo".to_string(),
                "-Command".to_string(),
                command.to_string(),
            ],
            _ => vec!["-c".to_string(), command.to_string()],
        }
    }

    /// 是否支持 `-l` 登录参数
    fn supports_login_flag(&self) -> bool {
        matches!(self, Self::Bash | Self::Zsh | Self::Fish)
    }
}

/// 解析要使用的 shell：配置优先，其次 `$SHELL`
pub fn resolve_shell(configured: Option<&str>) -> String {
    if let Some(shell) = configured.map(str::trim).filter(|s| !s.is_empty()) {
        return shell.to_string();
    }
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| {
            if cfg!(target_os = "macos") {
                "/bin/zsh".to_string()
            } else {
                "/bin/bash".to_string()
            }
        })
}

static LOGIN_PATH: OnceCell<Option<String>> = OnceCell::new();

/// 登录 shell 的 PATH（首次调用时捕获，之后复用）
///
/// 会阻塞执行一次 shell，异步上下文中应放到 `spawn_blocking`。
pub fn login_shell_path(shell: &str) -> Option<String> {
    LOGIN_PATH
        .get_or_init(|| {
            let captured = capture_login_path(shell);
            match &captured {
                Some(path) => tracing::info!("[ShellEnv] 已捕获登录 PATH: {}", path),
                None => tracing::warn!("[ShellEnv] 无法捕获登录 PATH，使用当前进程 PATH"),
            }
            captured.or_else(|| std::env::var("PATH").ok())
        })
        .clone()
}

fn capture_login_path(shell: &str) -> Option<String> {
    let shell_type = ShellType::from_path(shell);
    let mut cmd = std::process::Command::new(shell);
    if shell_type.supports_login_flag() {
        cmd.arg("-l");
    }
    let output = cmd
        .args(shell_type.command_args("printf '%s' \"$PATH\""))
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_captured_path(&String::from_utf8_lossy(&output.stdout))
}

/// 登录脚本可能输出其他内容，取最后一个非空行
fn parse_captured_path(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
}

/// 构造命令执行环境变量
pub fn command_env(path: Option<&str>) -> Vec<(String, String)> {
    let mut env = vec![
        ("TERM".to_string(), "xterm-256color".to_string()),
        ("COLORTERM".to_string(), "truecolor".to_string()),
    ];
    if let Some(path) = path {
        env.push(("PATH".to_string(), path.to_string()));
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_type_from_path() {
        assert_eq!(ShellType::from_path("/bin/bash"), ShellType::Bash);
        assert_eq!(ShellType::from_path("/usr/local/bin/zsh"), ShellType::Zsh);
        assert_eq!(ShellType::from_path("/opt/homebrew/bin/fish"), ShellType::Fish);
        assert_eq!(ShellType::from_path("pwsh.exe"), ShellType::Pwsh);
        assert_eq!(ShellType::from_path("/bin/sh"), ShellType::Unknown);
    }

    #[test]
    fn test_command_args() {
        assert_eq!(ShellType::Zsh.command_args("pwd"), vec!["-c", "pwd"]);
        assert_eq!(
            ShellType::Pwsh.command_args("ls"),
            vec!["-NoLogo", "-Command", "ls"]
        );
    }

    #[test]
    fn test_resolve_shell_prefers_config() {
        assert_eq!(resolve_shell(Some("/bin/fish")), "/bin/fish");
        assert!(!resolve_shell(Some("  ")).is_empty());
        assert!(!resolve_shell(None).is_empty());
    }

    #[test]
    fn test_parse_captured_path_takes_last_line() {
        assert_eq!(
            parse_captured_path("welcome!\n/usr/bin:/bin\n").as_deref(),
            Some("/usr/bin:/bin")
        );
        assert_eq!(parse_captured_path("\n  \n"), None);
    }

    #[test]
    fn test_command_env() {
        let env = command_env(Some("/usr/bin"));
        assert!(env.contains(&("TERM".to_string(), "xterm-256color".to_string())));
        assert!(env.contains(&("PATH".to_string(), "/usr/bin".to_string())));
        assert_eq!(command_env(None).len(), 2);
    }
}
