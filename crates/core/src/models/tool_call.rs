//! 工具调用类型定义
//!
//! AI 回合中由代理发起的一次工具调用，归属于唯一的 AI 响应块。

use serde::{Deserialize, Serialize};

/// 工具调用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    /// 是否已结束（completed 或 error）
    pub fn is_finished(&self) -> bool {
        matches!(self, ToolStatus::Completed | ToolStatus::Error)
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolStatus::Pending => write!(f, "pending"),
            ToolStatus::Running => write!(f, "running"),
            ToolStatus::Completed => write!(f, "completed"),
            ToolStatus::Error => write!(f, "error"),
        }
    }
}

/// 工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// 工具调用 ID（由代理分配）
    pub id: String,
    /// 工具名称
    pub name: String,
    /// 工具输入参数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// 工具输出
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// 当前状态
    #[serde(default)]
    pub status: ToolStatus,
    /// 开始时间（Unix 时间戳，毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// 结束时间（Unix 时间戳，毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
}

impl ToolCall {
    /// 创建运行中的工具调用
    pub fn running(
        id: impl Into<String>,
        name: impl Into<String>,
        input: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            output: None,
            status: ToolStatus::Running,
            started_at: Some(chrono::Utc::now().timestamp_millis()),
            ended_at: None,
        }
    }

    /// 记录工具结果
    pub fn finish(&mut self, output: String, is_error: bool) {
        self.output = Some(output);
        self.status = if is_error {
            ToolStatus::Error
        } else {
            ToolStatus::Completed
        };
        self.ended_at = Some(chrono::Utc::now().timestamp_millis());
    }
}
