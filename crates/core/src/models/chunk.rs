//! 规范化流式块协议
//!
//! 三种代理后端的输出统一转换为 `Chunk` 序列。每个回合的流以
//! `Error` 或 `Done` 结束。

use serde::{Deserialize, Serialize};

/// 回合统计信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TurnStats {
    /// 输入 token 数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    /// 输出 token 数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    /// 费用（美元）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// 回合耗时（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// 实际使用的模型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// 提供方名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl TurnStats {
    /// 合并另一份统计，`other` 中存在的字段优先
    pub fn merge(&mut self, other: TurnStats) {
        self.input_tokens = other.input_tokens.or(self.input_tokens);
        self.output_tokens = other.output_tokens.or(self.output_tokens);
        self.cost_usd = other.cost_usd.or(self.cost_usd);
        self.duration_ms = other.duration_ms.or(self.duration_ms);
        self.model = other.model.or(self.model.take());
        self.provider = other.provider.or(self.provider.take());
    }

    /// 总 token 数
    pub fn total_tokens(&self) -> Option<u64> {
        match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (i, o) => Some(i.unwrap_or(0) + o.unwrap_or(0)),
        }
    }
}

/// 规范化流式块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Chunk {
    /// 响应文本增量
    Text { content: String },
    /// 思考过程增量
    Thinking { content: String },
    /// 代理开始调用工具
    ToolCall {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
    },
    /// 工具调用结果
    ToolResult {
        id: String,
        output: String,
        #[serde(default)]
        is_error: bool,
    },
    /// 回合统计
    Stats(TurnStats),
    /// 后端错误（终止块）
    Error { message: String },
    /// 回合结束（终止块）
    Done {
        /// 因等待超时而合成的结束块
        #[serde(default)]
        timed_out: bool,
    },
}

impl Chunk {
    pub fn text(content: impl Into<String>) -> Self {
        Chunk::Text {
            content: content.into(),
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Chunk::Thinking {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Chunk::Error {
            message: message.into(),
        }
    }

    pub fn done() -> Self {
        Chunk::Done { timed_out: false }
    }

    /// 等待超时时合成的结束块
    pub fn timed_out() -> Self {
        Chunk::Done { timed_out: true }
    }

    /// 是否为终止块
    pub fn is_terminal(&self) -> bool {
        matches!(self, Chunk::Error { .. } | Chunk::Done { .. })
    }

    /// 块类型名称（用于日志）
    pub fn kind(&self) -> &'static str {
        match self {
            Chunk::Text { .. } => "text",
            Chunk::Thinking { .. } => "thinking",
            Chunk::ToolCall { .. } => "tool-call",
            Chunk::ToolResult { .. } => "tool-result",
            Chunk::Stats(_) => "stats",
            Chunk::Error { .. } => "error",
            Chunk::Done { .. } => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_wire_tags() {
        let json = serde_json::to_value(Chunk::ToolResult {
            id: "t1".to_string(),
            output: "ok".to_string(),
            is_error: false,
        })
        .unwrap();
        assert_eq!(json["type"], "tool-result");
        assert_eq!(json["id"], "t1");

        let stats = serde_json::to_value(Chunk::Stats(TurnStats {
            output_tokens: Some(12),
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(stats["type"], "stats");
        assert_eq!(stats["output_tokens"], 12);
    }

    #[test]
    fn test_chunk_done_defaults_not_timed_out() {
        let chunk: Chunk = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(chunk, Chunk::done());
        assert!(chunk.is_terminal());
        assert!(Chunk::error("boom").is_terminal());
        assert!(!Chunk::text("hi").is_terminal());
    }

    #[test]
    fn test_stats_merge_prefers_newer_fields() {
        let mut base = TurnStats {
            input_tokens: Some(10),
            model: Some("a".to_string()),
            ..Default::default()
        };
        base.merge(TurnStats {
            output_tokens: Some(5),
            model: Some("b".to_string()),
            ..Default::default()
        });
        assert_eq!(base.input_tokens, Some(10));
        assert_eq!(base.output_tokens, Some(5));
        assert_eq!(base.model.as_deref(), Some("b"));
        assert_eq!(base.total_tokens(), Some(15));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_stats() -> impl Strategy<Value = TurnStats> {
            (
                proptest::option::of(0u64..1_000_000),
                proptest::option::of(0u64..1_000_000),
                proptest::option::of(0u64..100_000),
                proptest::option::of("[a-z0-9-]{1,12}"),
                proptest::option::of("[a-z]{1,8}"),
            )
                .prop_map(|(input_tokens, output_tokens, duration_ms, model, provider)| TurnStats {
                    input_tokens,
                    output_tokens,
                    cost_usd: None,
                    duration_ms,
                    model,
                    provider,
                })
        }

        proptest! {
            #[test]
            fn prop_merge_keeps_present_fields(base in arb_stats(), other in arb_stats()) {
                let mut merged = base.clone();
                merged.merge(other.clone());
                prop_assert_eq!(merged.input_tokens, other.input_tokens.or(base.input_tokens));
                prop_assert_eq!(merged.output_tokens, other.output_tokens.or(base.output_tokens));
                prop_assert_eq!(merged.duration_ms, other.duration_ms.or(base.duration_ms));
                prop_assert_eq!(merged.model, other.model.or(base.model));
                prop_assert_eq!(merged.provider, other.provider.or(base.provider));
            }

            #[test]
            fn prop_merge_with_empty_is_identity(stats in arb_stats()) {
                let mut merged = stats.clone();
                merged.merge(TurnStats::default());
                prop_assert_eq!(&merged, &stats);

                let mut from_empty = TurnStats::default();
                from_empty.merge(stats.clone());
                prop_assert_eq!(from_empty, stats);
            }
        }
    }
}
