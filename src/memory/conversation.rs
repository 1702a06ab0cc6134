//! 短期记忆的基本单元：消息与工具调用请求
//!
//! Message 创建后不可变，按到达顺序排列；assistant 消息可携带有序的 tool_calls，
//! tool 消息带 tool_name 以对应发起调用的工具。

use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    /// 工具结果
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// 推理节点产出的工具调用：{"tool": "topic_search", "args": {"topic": "..."}}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// 携带工具调用请求的 assistant 消息
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(tool: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 渲染为对话记录中的一段（推理 prompt 与摘要 prompt 共用）
    pub fn transcript_line(&self) -> String {
        match self.role {
            Role::User => format!("User: {}", self.content),
            Role::System => format!("System: {}", self.content),
            Role::Assistant => {
                let calls: Vec<String> = self
                    .tool_calls
                    .iter()
                    .map(|tc| format!("Tool Call: {}({})", tc.tool, tc.args))
                    .collect();
                if calls.is_empty() {
                    format!("Assistant: {}", self.content)
                } else {
                    format!("Assistant: {}\n{}", self.content, calls.join("\n"))
                }
            }
            Role::Tool => format!(
                "Tool Result (for {}): {}",
                self.tool_name.as_deref().unwrap_or("unknown"),
                self.content
            ),
        }
    }
}

/// 将消息序列渲染为对话记录
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(Message::transcript_line)
        .collect::<Vec<_>>()
        .join("\n\n")
}
