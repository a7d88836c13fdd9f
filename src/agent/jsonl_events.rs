//! 一次性代理的 JSONL 事件解析
//!
//! 支持两种事件格式：
//! - 扁平格式：`message` / `reasoning` / `tool_call` / `tool_result` / `patch` / `error` / `done`，
//!   字段名宽松（`content|text|message`、`id|call_id`、`input|arguments|args`）
//! - item 格式：`item.started` / `item.completed` / `turn.completed` / `turn.failed`
//!
//! `done` 解析为 `Chunk::Done`，由管理器在进程退出后统一收尾。

use serde_json::{json, Value};

use infinitty_core::{Chunk, TurnStats};
use infinitty_infra::first_str;

const TEXT_KEYS: &[&str] = &["content", "text", "message", "delta"];
const ID_KEYS: &[&str] = &["id", "call_id", "tool_call_id"];
const INPUT_KEYS: &[&str] = &["input", "arguments", "args"];
const OUTPUT_KEYS: &[&str] = &["output", "content", "result", "text"];

/// 解析一个事件
pub fn parse_event(event: &Value) -> Vec<Chunk> {
    let Some(kind) = event.get("type").and_then(Value::as_str) else {
        return Vec::new();
    };

    match kind {
        "message" | "agent_message" => text_field(event).map(Chunk::text).into_iter().collect(),
        "reasoning" | "agent_reasoning" => {
            text_field(event).map(Chunk::thinking).into_iter().collect()
        }
        "tool_call" => vec![Chunk::ToolCall {
            id: call_id(event),
            name: first_str(event, &["name", "tool"])
                .unwrap_or("tool")
                .to_string(),
            input: input_field(event),
        }],
        "tool_result" => vec![Chunk::ToolResult {
            id: call_id(event),
            output: output_field(event),
            is_error: is_error(event),
        }],
        "patch" => parse_patch(event),
        "error" => vec![Chunk::error(
            first_str(event, &["message", "error"]).unwrap_or("unknown error"),
        )],
        "done" => vec![Chunk::done()],
        "item.started" => event.get("item").map(parse_item_started).unwrap_or_default(),
        "item.completed" => event
            .get("item")
            .map(parse_item_completed)
            .unwrap_or_default(),
        "turn.completed" => vec![Chunk::Stats(usage_stats(event.get("usage")))],
        "turn.failed" => {
            let message = event
                .get("error")
                .and_then(|e| first_str(e, &["message"]))
                .unwrap_or("turn failed");
            vec![Chunk::error(message)]
        }
        other => {
            tracing::trace!("[JsonlEvents] 忽略事件: type={}", other);
            Vec::new()
        }
    }
}

fn text_field(event: &Value) -> Option<&str> {
    first_str(event, TEXT_KEYS).filter(|s| !s.is_empty())
}

fn call_id(event: &Value) -> String {
    first_str(event, ID_KEYS).unwrap_or_default().to_string()
}

/// 参数可能是对象，也可能是 JSON 字符串
fn input_field(event: &Value) -> Option<Value> {
    INPUT_KEYS
        .iter()
        .find_map(|k| event.get(*k))
        .map(|v| match v {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| v.clone()),
            other => other.clone(),
        })
}

fn output_field(event: &Value) -> String {
    OUTPUT_KEYS
        .iter()
        .find_map(|k| event.get(*k))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

fn is_error(event: &Value) -> bool {
    event
        .get("is_error")
        .and_then(Value::as_bool)
        .or_else(|| event.get("success").and_then(Value::as_bool).map(|ok| !ok))
        .unwrap_or(false)
}

/// 补丁事件展开为一次已完成的工具调用
fn parse_patch(event: &Value) -> Vec<Chunk> {
    let id = call_id(event);
    let input = event
        .get("changes")
        .or_else(|| event.get("patch"))
        .cloned()
        .or_else(|| input_field(event));
    vec![
        Chunk::ToolCall {
            id: id.clone(),
            name: "patch".to_string(),
            input,
        },
        Chunk::ToolResult {
            id,
            output: output_field(event),
            is_error: is_error(event),
        },
    ]
}

fn parse_item_started(item: &Value) -> Vec<Chunk> {
    match item.get("type").and_then(Value::as_str) {
        Some("command_execution") => vec![Chunk::ToolCall {
            id: call_id(item),
            name: "shell".to_string(),
            input: item.get("command").map(|c| json!({ "command": c })),
        }],
        Some("mcp_tool_call") => vec![Chunk::ToolCall {
            id: call_id(item),
            name: first_str(item, &["tool", "name"]).unwrap_or("tool").to_string(),
            input: input_field(item),
        }],
        _ => Vec::new(),
    }
}

fn parse_item_completed(item: &Value) -> Vec<Chunk> {
    match item.get("type").and_then(Value::as_str) {
        Some("agent_message") => text_field(item).map(Chunk::text).into_iter().collect(),
        Some("reasoning") => text_field(item).map(Chunk::thinking).into_iter().collect(),
        Some("command_execution") => {
            let failed = item.get("status").and_then(Value::as_str) == Some("failed")
                || item
                    .get("exit_code")
                    .and_then(Value::as_i64)
                    .is_some_and(|code| code != 0);
            vec![
                Chunk::ToolCall {
                    id: call_id(item),
                    name: "shell".to_string(),
                    input: item.get("command").map(|c| json!({ "command": c })),
                },
                Chunk::ToolResult {
                    id: call_id(item),
                    output: first_str(item, &["aggregated_output", "output"])
                        .unwrap_or_default()
                        .to_string(),
                    is_error: failed,
                },
            ]
        }
        Some("file_change") => {
            let failed = item.get("status").and_then(Value::as_str) == Some("failed");
            vec![
                Chunk::ToolCall {
                    id: call_id(item),
                    name: "patch".to_string(),
                    input: item.get("changes").cloned(),
                },
                Chunk::ToolResult {
                    id: call_id(item),
                    output: first_str(item, &["status"]).unwrap_or_default().to_string(),
                    is_error: failed,
                },
            ]
        }
        Some("error") => text_field(item).map(Chunk::error).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn usage_stats(usage: Option<&Value>) -> TurnStats {
    TurnStats {
        input_tokens: usage.and_then(|u| u.get("input_tokens")).and_then(Value::as_u64),
        output_tokens: usage.and_then(|u| u.get("output_tokens")).and_then(Value::as_u64),
        ..Default::default()
    }
}
