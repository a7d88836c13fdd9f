//! 命令输出清洗
//!
//! 将 PTY 原始输出转换为适合展示的纯文本。
//!
//! ## 功能
//! - 去除 ANSI CSI / OSC / 括号粘贴等转义序列与回车符
//! - 去除开头空行、命令回显行、启发式识别的提示符行
//! - 去除结尾空行
//!
//! 清洗是幂等的：`clean(clean(x, c), c) == clean(x, c)`。

use once_cell::sync::Lazy;
use regex::Regex;

use infinitty_core::config::DEFAULT_PROMPT_PATTERN;

/// ANSI 转义序列
///
/// 依次匹配 OSC（BEL 或 ST 结尾）、CSI（含括号粘贴 `ESC[200~`）、
/// 字符集选择以及其余双字节 ESC 序列。
static ANSI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
        r"|\x1b\[[0-?]*[ -/]*[@-~]",
        r"|\x1b[()*+][0-9A-Za-z]",
        r"|\x1b[@-Z\\-_=>78]",
    ))
    .expect("ANSI 正则无效")
});

static DEFAULT_SANITIZER: Lazy<OutputSanitizer> = Lazy::new(OutputSanitizer::default);

/// 使用默认提示符模式清洗输出
pub fn clean(raw: &str, command: &str) -> String {
    DEFAULT_SANITIZER.clean(raw, command)
}

/// 只去除转义序列与控制字符，保留行结构
pub fn strip_ansi(raw: &str) -> String {
    let stripped = ANSI_RE.replace_all(raw, "");
    stripped
        .chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect()
}

/// 输出清洗器
#[derive(Debug, Clone)]
pub struct OutputSanitizer {
    prompt_re: Regex,
}

impl Default for OutputSanitizer {
    fn default() -> Self {
        Self {
            prompt_re: Regex::new(DEFAULT_PROMPT_PATTERN).expect("默认提示符正则无效"),
        }
    }
}

impl OutputSanitizer {
    /// 使用自定义提示符模式创建清洗器
    ///
    /// # 返回
    /// - `Err(regex::Error)`: 模式无效
    pub fn new(prompt_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            prompt_re: Regex::new(prompt_pattern)?,
        })
    }

    /// 清洗原始输出
    ///
    /// # 参数
    /// - `raw`: PTY 原始输出
    /// - `command`: 执行的命令文本（用于识别回显行）
    pub fn clean(&self, raw: &str, command: &str) -> String {
        let text = strip_ansi(raw);
        let command = command.trim();

        let lines: Vec<&str> = text
            .split('\n')
            .filter(|line| !self.is_echo(line, command) && !self.is_prompt(line, command))
            .collect();

        let start = lines
            .iter()
            .position(|line| !line.trim().is_empty())
            .unwrap_or(lines.len());
        let end = lines
            .iter()
            .rposition(|line| !line.trim().is_empty())
            .map(|i| i + 1)
            .unwrap_or(start);

        lines[start..end.max(start)].join("\n")
    }

    fn is_echo(&self, line: &str, command: &str) -> bool {
        !command.is_empty() && line.trim() == command
    }

    fn is_prompt(&self, line: &str, command: &str) -> bool {
        self.prompt_re.is_match(line) && (command.is_empty() || !line.contains(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_csi_and_osc() {
        let raw = "\x1b]0;title\x07\x1b[1;32mhello\x1b[0m world\r\n";
        assert_eq!(clean(raw, "echo hello"), "hello world");
    }

    #[test]
    fn test_strips_bracketed_paste_markers() {
        let raw = "\x1b[?2004h\x1b[200~payload\x1b[201~\x1b[?2004l";
        assert_eq!(clean(raw, "cat"), "payload");
    }

    #[test]
    fn test_drops_echo_and_prompt_lines() {
        let raw = "\r\npwd\r\n/tmp\r\nuser@host:~$ \r\n\r\n";
        assert_eq!(clean(raw, "pwd"), "/tmp");
    }

    #[test]
    fn test_keeps_inner_blank_lines() {
        let raw = "\n\na\n\nb\n\n";
        assert_eq!(clean(raw, "ls"), "a\n\nb");
    }

    #[test]
    fn test_prompt_line_containing_command_is_kept() {
        let raw = "out\nme@box:~/proj ls>\n";
        assert_eq!(clean(raw, "ls"), "out\nme@box:~/proj ls>");
    }

    #[test]
    fn test_custom_prompt_pattern() {
        let sanitizer = OutputSanitizer::new(r"^PROMPT>\s*$").unwrap();
        assert_eq!(sanitizer.clean("a@b:c$\nPROMPT>\nresult", "x"), "a@b:c$\nresult");
        assert!(OutputSanitizer::new("(").is_err());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(clean("", "ls"), "");
        assert_eq!(clean("\r\n\r\n", "ls"), "");
    }

    #[test]
    fn test_lone_escape_does_not_survive() {
        let raw = "\x1b\x1b[31m[0mtext";
        let once = clean(raw, "");
        assert!(!once.contains('\x1b'));
        assert_eq!(clean(&once, ""), once);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_terminal_output() -> impl Strategy<Value = String> {
            prop::collection::vec(
                prop_oneof![
                    "[a-z0-9 /.~@:$%#>-]{0,12}",
                    Just("\r\n".to_string()),
                    Just("\n".to_string()),
                    Just("\x1b[".to_string()),
                    Just("\x1b[0m".to_string()),
                    Just("\x1b]0;t\x07".to_string()),
                    Just("\x1b".to_string()),
                    Just("\r".to_string()),
                    Just("ls".to_string()),
                ],
                0..24,
            )
            .prop_map(|parts| parts.concat())
        }

        proptest! {
            #[test]
            fn prop_clean_is_idempotent(raw in arb_terminal_output(), cmd in "(ls|pwd|echo hi|)") {
                let once = clean(&raw, &cmd);
                let twice = clean(&once, &cmd);
                prop_assert_eq!(twice, once);
            }

            #[test]
            fn prop_clean_has_no_escape_or_carriage_return(raw in any::<String>()) {
                let out = clean(&raw, "ls");
                prop_assert!(!out.contains('\x1b'));
                prop_assert!(!out.contains('\r'));
                prop_assert_eq!(clean(&out, "ls"), out.clone());
            }
        }
    }
}
