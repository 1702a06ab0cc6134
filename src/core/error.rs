//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt / Abort。
//! 工具侧错误（ToolError）不会中止回合，而是作为 tool 消息回灌给推理节点。

use thiserror::Error;

use crate::llm::LlmError;

/// 存储协作方错误（摘要、短期消息、目录、向量记录、采购请求）
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage timeout after {0}s")]
    Timeout(u64),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// 工具执行错误：全部可恢复，由执行器转成人类可读的 tool 消息
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// 参数缺失、类型不符、约束不满足
    #[error("Invalid arguments for {tool}: {reason}")]
    Validation { tool: String, reason: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 存储 / 嵌入 / 文本提取等外部能力失败
    #[error("{tool} failed: {reason}")]
    External { tool: String, reason: String },

    #[error("Tool timeout: {0}")]
    Timeout(String),
}

impl ToolError {
    pub fn validation(tool: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    pub fn external(tool: &str, reason: impl std::fmt::Display) -> Self {
        Self::External {
            tool: tool.to_string(),
            reason: reason.to_string(),
        }
    }

    /// 回灌给推理节点的文字；校验失败时提示模型向用户澄清
    pub fn observation(&self) -> String {
        match self {
            ToolError::Validation { .. } => format!(
                "Error: {self}. Ask the user for the missing or corrected details instead of guessing."
            ),
            ToolError::UnknownTool(_) => {
                format!("Error: {self}. Only use the tools listed in the instructions.")
            }
            ToolError::External { .. } | ToolError::Timeout(_) => format!(
                "Error: {self}. Apologise to the user and suggest trying again later."
            ),
        }
    }
}

/// Agent 运行过程中可能出现的回合级错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// 推理/执行循环超过上限
    #[error("Reached max reasoning iterations ({0})")]
    MaxIterations(usize),

    #[error("Turn cancelled")]
    Cancelled,
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让 LLM 重试（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 终止当前回合
    Abort,
}
