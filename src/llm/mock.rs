//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 按脚本依次返回预设的 Completion / 错误；脚本耗尽后交给 responder，
//! 都没有时回显最后一条用户输入。所有收到的消息都会被记录，便于断言 prompt 内容。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{Completion, LlmClient, LlmError};
use crate::memory::{Message, Role};

type Responder = Box<dyn Fn(&[Message]) -> Result<Completion, LlmError> + Send + Sync>;

/// Mock 客户端
#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    responder: Option<Responder>,
    prompts: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回给定结果
    pub fn scripted(replies: Vec<Result<Completion, LlmError>>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    /// 脚本耗尽后按消息内容动态生成回复
    pub fn with_responder(
        mut self,
        f: impl Fn(&[Message]) -> Result<Completion, LlmError> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Box::new(f));
        self
    }

    /// 每次调用前等待（模拟慢速提供方）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 追加一条脚本回复
    pub fn push(&self, reply: Result<Completion, LlmError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }

    /// 已收到的全部请求
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// 最近一次请求拼接后的全文
    pub fn last_prompt_text(&self) -> String {
        self.prompts()
            .last()
            .map(|msgs| {
                msgs.iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<Completion, LlmError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(reply) = next {
            return reply;
        }
        if let Some(ref f) = self.responder {
            return f(messages);
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(Completion::text(format!(
            "Echo from Mock: {}",
            last_user.lines().last().unwrap_or(last_user)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolCall;

    #[tokio::test]
    async fn test_script_then_echo() {
        let mock = MockLlmClient::scripted(vec![
            Ok(Completion::with_calls(vec![ToolCall::new(
                "topic_search",
                serde_json::json!({"topic": "space"}),
            )])),
            Err(LlmError::ApiError("rate limited".into())),
        ]);
        let msgs = vec![Message::user("hello")];
        let first = mock.complete(&msgs).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert!(mock.complete(&msgs).await.is_err());
        let third = mock.complete(&msgs).await.unwrap();
        assert!(third.text.contains("hello"));
        assert_eq!(mock.call_count(), 3);
    }
}
