//! 回合过程事件：用于流式展示思考、工具调用、观察与回复

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 推理步数更新（从 1 开始）
    StepUpdate { step: usize, max_steps: usize },
    /// 正在调用补全能力
    Thinking,
    /// 工具调用前模型给出的说明文字
    ThinkingContent { text: String },
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 工具执行失败（已作为 tool 消息回灌）
    ToolFailure { tool: String, reason: String },
    /// 错误恢复动作（RetryWithPrompt / Abort）
    Recovery { action: String, detail: String },
    /// 最终回复的一小段（流式输出）
    MessageChunk { text: String },
    /// 最终回复结束
    MessageDone,
    /// Token 使用统计（本回合增量 + 累计）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        cumulative_total: u64,
    },
    Error { text: String },
}
