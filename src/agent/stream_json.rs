//! stream-json 行协议解析
//!
//! 常驻代理进程的 stdout 每行一个 JSON 事件，按 `type` 分类：
//! - `assistant` → 文本 / 思考 / 工具调用
//! - `user` 中的 `tool_result` 与顶层 `tool_result` → 工具结果
//! - `result` → 统计 + 结束（`is_error` 时为错误）
//! - `error` → 错误
//! - `system` 及其他类型忽略

use serde_json::Value;

use infinitty_core::{Chunk, TurnStats};
use infinitty_infra::first_str;

/// 默认提供方
pub const PROVIDER: &str = "anthropic";

/// 解析一个事件
pub fn parse_event(event: &Value) -> Vec<Chunk> {
    match event.get("type").and_then(Value::as_str) {
        Some("assistant") => parse_assistant(event),
        Some("user") => content_items(event)
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("tool_result"))
            .filter_map(parse_tool_result)
            .collect(),
        Some("tool_result") => parse_tool_result(event).into_iter().collect(),
        Some("result") => parse_result(event),
        Some("error") => vec![Chunk::error(error_message(event))],
        Some("system") => Vec::new(),
        Some(other) => {
            tracing::trace!("[StreamJson] 忽略事件: type={}", other);
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn content_items(event: &Value) -> &[Value] {
    event
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn parse_assistant(event: &Value) -> Vec<Chunk> {
    // 纯字符串内容
    if let Some(text) = event
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
    {
        return vec![Chunk::text(text)];
    }

    content_items(event)
        .iter()
        .filter_map(|item| match item.get("type").and_then(Value::as_str) {
            Some("text") => first_str(item, &["text"]).map(Chunk::text),
            Some("thinking") => first_str(item, &["thinking", "text"]).map(Chunk::thinking),
            Some("tool_use") => Some(Chunk::ToolCall {
                id: first_str(item, &["id"]).unwrap_or_default().to_string(),
                name: first_str(item, &["name"]).unwrap_or("tool").to_string(),
                input: item.get("input").cloned(),
            }),
            _ => None,
        })
        .collect()
}

fn parse_tool_result(item: &Value) -> Option<Chunk> {
    let id = first_str(item, &["tool_use_id", "id"])?;
    Some(Chunk::ToolResult {
        id: id.to_string(),
        output: tool_output(item.get("content")),
        is_error: item
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// 工具输出可能是字符串，也可能是内容块数组
fn tool_output(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().or_else(|| first_str(item, &["text"])))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn parse_result(event: &Value) -> Vec<Chunk> {
    let usage = event.get("usage");
    let stats = TurnStats {
        input_tokens: usage.and_then(|u| u.get("input_tokens")).and_then(Value::as_u64),
        output_tokens: usage.and_then(|u| u.get("output_tokens")).and_then(Value::as_u64),
        cost_usd: event
            .get("total_cost_usd")
            .or_else(|| event.get("cost_usd"))
            .and_then(Value::as_f64),
        duration_ms: event.get("duration_ms").and_then(Value::as_u64),
        model: result_model(event),
        provider: Some(PROVIDER.to_string()),
    };

    let is_error = event
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let terminal = if is_error {
        let message = first_str(event, &["result", "error", "subtype"]).unwrap_or("unknown error");
        Chunk::error(message)
    } else {
        Chunk::done()
    };
    vec![Chunk::Stats(stats), terminal]
}

fn result_model(event: &Value) -> Option<String> {
    event
        .get("modelUsage")
        .and_then(Value::as_object)
        .and_then(|usage| usage.keys().next().cloned())
        .or_else(|| first_str(event, &["model"]).map(str::to_string))
}

fn error_message(event: &Value) -> String {
    match event.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(err) => first_str(err, &["message"])
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
        None => first_str(event, &["message"])
            .unwrap_or("unknown error")
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_content_blocks() {
        let chunks = parse_event(&json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "thinking", "thinking": "let me look"},
                {"type": "text", "text": "Here you go"},
                {"type": "tool_use", "id": "toolu_1", "name": "Bash", "input": {"command": "ls"}}
            ]}
        }));
        assert_eq!(
            chunks,
            vec![
                Chunk::thinking("let me look"),
                Chunk::text("Here you go"),
                Chunk::ToolCall {
                    id: "toolu_1".to_string(),
                    name: "Bash".to_string(),
                    input: Some(json!({"command": "ls"})),
                },
            ]
        );
    }

    #[test]
    fn test_tool_results_from_user_and_top_level() {
        let from_user = parse_event(&json!({
            "type": "user",
            "message": {"content": [
                {"type": "tool_result", "tool_use_id": "toolu_1",
                 "content": [{"type": "text", "text": "a.txt"}, {"type": "text", "text": "b.txt"}]}
            ]}
        }));
        assert_eq!(
            from_user,
            vec![Chunk::ToolResult {
                id: "toolu_1".to_string(),
                output: "a.txt\nb.txt".to_string(),
                is_error: false,
            }]
        );

        let top = parse_event(&json!({
            "type": "tool_result", "tool_use_id": "toolu_2", "content": "denied", "is_error": true
        }));
        assert_eq!(
            top,
            vec![Chunk::ToolResult {
                id: "toolu_2".to_string(),
                output: "denied".to_string(),
                is_error: true,
            }]
        );
    }

    #[test]
    fn test_result_yields_stats_then_done() {
        let chunks = parse_event(&json!({
            "type": "result", "subtype": "success", "is_error": false,
            "duration_ms": 1200, "total_cost_usd": 0.02,
            "usage": {"input_tokens": 10, "output_tokens": 20},
            "modelUsage": {"claude-sonnet-4": {}}
        }));
        assert_eq!(chunks.len(), 2);
        match &chunks[0] {
            Chunk::Stats(stats) => {
                assert_eq!(stats.input_tokens, Some(10));
                assert_eq!(stats.output_tokens, Some(20));
                assert_eq!(stats.cost_usd, Some(0.02));
                assert_eq!(stats.duration_ms, Some(1200));
                assert_eq!(stats.model.as_deref(), Some("claude-sonnet-4"));
                assert_eq!(stats.provider.as_deref(), Some("anthropic"));
            }
            other => panic!("unexpected chunk: {:?}", other),
        }
        assert_eq!(chunks[1], Chunk::done());
    }

    #[test]
    fn test_error_result_and_error_event() {
        let chunks = parse_event(&json!({
            "type": "result", "subtype": "error_max_turns", "is_error": true
        }));
        assert_eq!(chunks[1], Chunk::error("error_max_turns"));

        assert_eq!(
            parse_event(&json!({"type": "error", "error": {"message": "overloaded"}})),
            vec![Chunk::error("overloaded")]
        );
    }

    #[test]
    fn test_system_and_unknown_ignored() {
        assert!(parse_event(&json!({"type": "system", "subtype": "init"})).is_empty());
        assert!(parse_event(&json!({"type": "stream_event"})).is_empty());
        assert!(parse_event(&json!({"no_type": true})).is_empty());
    }
}
