//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Groq / Mock）实现 LlmClient：输入消息，输出 Completion（文本 + 工具调用）。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::{Message, ToolCall};

/// 补全能力错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Completion timeout after {0}s")]
    Timeout(u64),

    #[error("Provider error: {0}")]
    ApiError(String),

    #[error("Malformed request: {0}")]
    InvalidRequest(String),
}

/// 一次补全的结构化结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；工具调用由实现方从模型输出中解析
    async fn complete(&self, messages: &[Message]) -> Result<Completion, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
