//! 行分隔 JSON 帧解析
//!
//! 子进程 stdout 按任意字节边界到达，`LineBuffer` 保留未完成的行，
//! 只有遇到换行符才产出完整行。

use serde_json::Value;

/// 换行缓冲区
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加字节并取出所有完整行（不含换行符，去除行尾 `\r`）
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// 取出剩余的不完整行（流结束时调用）
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }

    /// 缓冲中未完成的字节数
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// 解析一行 JSON
///
/// 空行返回 `None`；解析失败记录日志后返回 `None`，调用方跳过该行。
pub fn parse_line(source: &str, line: &str) -> Option<Value> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => Some(value),
        Err(e) => {
            let preview: String = trimmed.chars().take(120).collect();
            tracing::warn!(
                "[{}] 跳过无法解析的行: error={}, line={}",
                source,
                e,
                preview
            );
            None
        }
    }
}

/// 按顺序取第一个存在的字符串字段
pub fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_str))
}
