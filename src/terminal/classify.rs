//! 命令分类与目录切换解析
//!
//! ## 功能
//! - 按白名单把命令分为捕获模式（simple）与交互模式（interactive）
//! - 解析单独的 `cd <path>` 命令并计算目标目录

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// 命令执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    /// 一次性捕获输出
    Simple,
    /// 完整 PTY 会话
    Interactive,
}

/// 会把命令变成复合命令的 shell 运算符
const SHELL_OPERATORS: &[&str] = &["|", ";", "&", ">", "<", "`", "$("];

/// 命令分类器
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    simple: HashSet<String>,
}

impl CommandClassifier {
    pub fn new<I, S>(simple_commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            simple: simple_commands.into_iter().map(Into::into).collect(),
        }
    }

    /// 判断执行模式
    ///
    /// 首个单词在白名单中且不含 shell 运算符时为 simple。
    pub fn classify(&self, command: &str) -> CommandMode {
        let command = command.trim();
        if SHELL_OPERATORS.iter().any(|op| command.contains(op)) {
            return CommandMode::Interactive;
        }
        match command.split_whitespace().next() {
            Some(program) if self.simple.contains(program) => CommandMode::Simple,
            _ => CommandMode::Interactive,
        }
    }
}

/// `cd` 的目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CdTarget {
    /// 单独的 `cd`
    Home,
    Path(String),
}

/// 解析单独的 `cd <path>`
///
/// 多个参数、`cd -` 或带运算符的命令返回 `None`。
pub fn parse_cd_target(command: &str) -> Option<CdTarget> {
    let command = command.trim();
    let rest = command.strip_prefix("cd")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    if SHELL_OPERATORS.iter().any(|op| rest.contains(op)) {
        return None;
    }

    let rest = rest.trim();
    if rest.is_empty() {
        return Some(CdTarget::Home);
    }

    let path = unquote(rest).map(str::to_string).or_else(|| {
        let unescaped = rest.replace("\\ ", " ");
        if rest.replace("\\ ", "").contains(char::is_whitespace) {
            None
        } else {
            Some(unescaped)
        }
    })?;

    if path == "-" {
        return None;
    }
    Some(CdTarget::Path(path))
}

fn unquote(s: &str) -> Option<&str> {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            let inner = &s[1..s.len() - 1];
            if !inner.contains(quote) {
                return Some(inner);
            }
        }
    }
    None
}

/// 计算 `cd` 之后的目录
///
/// 支持 `~`、`~/…`、绝对路径与相对路径，结果按词法规范化。
pub fn resolve_cd_path(target: &CdTarget, cwd: &Path, home: Option<&Path>) -> Option<PathBuf> {
    let resolved = match target {
        CdTarget::Home => home?.to_path_buf(),
        CdTarget::Path(p) if p == "~" => home?.to_path_buf(),
        CdTarget::Path(p) => match p.strip_prefix("~/") {
            Some(rest) => home?.join(rest),
            None if Path::new(p).is_absolute() => PathBuf::from(p),
            None => cwd.join(p),
        },
    };
    Some(normalize(&resolved))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
