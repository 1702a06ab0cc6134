//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 ReAct 循环决定是重试还是终止回合。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 只有输出格式问题值得重试；补全能力失败、取消、超限一律终止，由上层返回通用失败回复
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output contained malformed tool-call JSON: {raw}. \
                 To call tools, output only one JSON object of the form \
                 {{\"tool_calls\": [{{\"tool\": \"<name>\", \"args\": {{...}}}}]}}. \
                 To answer the user, write plain conversational text without JSON."
            )),
            AgentError::LlmError(_)
            | AgentError::Store(_)
            | AgentError::MaxIterations(_)
            | AgentError::Cancelled => RecoveryAction::Abort,
        }
    }
}
